mod change;
mod competitor;
pub mod core;
mod news;
mod page;
mod schema;
mod signal;
mod threat;

// Re-export Database and essential traits
pub use self::core::Database;
pub use self::core::DbLockErrorExt;
