use std::env;
use std::str::FromStr;
use tracing::warn;

/// Retrieves an environment variable and splits it into a vector of strings based on a delimiter.
///
/// Empty segments are dropped.
pub fn get_env_var_as_vec(var: &str, delimiter: char) -> Vec<String> {
    env::var(var)
        .unwrap_or_default()
        .split(delimiter)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses an environment variable, falling back to `default` when it is unset or malformed.
pub fn get_env_var_or<T: FromStr>(var: &str, default: T) -> T {
    match env::var(var) {
        Ok(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring malformed value for {}: {:?}", var, value);
                default
            }
        },
        Err(_) => default,
    }
}

/// Returns the environment variable as a string, or `default` when unset or blank.
pub fn get_env_var_string(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
