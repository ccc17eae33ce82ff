//! Response-shape normalisation.
//!
//! The scrape service returns content in several layouts. Each layout has its own extractor;
//! they are tried in a fixed order and the first hit wins.

use serde_json::Value;
use tracing::trace;

use super::types::ExtractedContent;
use crate::TARGET_WEB_REQUEST;

type Extractor = fn(&Value) -> Option<ExtractedContent>;

/// Extractors in priority order.
const EXTRACTORS: &[(&str, Extractor)] = &[
    ("top-level", from_top_level),
    ("data object", from_data_object),
    ("data array", from_data_array),
    ("root array", from_root_array),
];

/// Finds the first content object with non-blank markdown, or `None` if no shape matches.
pub fn extract_content(payload: &Value) -> Option<ExtractedContent> {
    EXTRACTORS.iter().find_map(|(shape, extractor)| {
        let content = extractor(payload)?;
        trace!(target: TARGET_WEB_REQUEST, "Extracted content using {} shape", shape);
        Some(content)
    })
}

/// True when the payload carries content fields at all, even if they are empty.
pub fn has_content_fields(payload: &Value) -> bool {
    match payload {
        Value::Array(_) => true,
        Value::Object(obj) => ["markdown", "html", "data"]
            .iter()
            .any(|key| obj.contains_key(*key)),
        _ => false,
    }
}

fn from_top_level(payload: &Value) -> Option<ExtractedContent> {
    content_from_object(payload)
}

fn from_data_object(payload: &Value) -> Option<ExtractedContent> {
    payload
        .get("data")
        .filter(|data| data.is_object())
        .and_then(content_from_object)
}

fn from_data_array(payload: &Value) -> Option<ExtractedContent> {
    payload
        .get("data")?
        .as_array()?
        .iter()
        .find_map(content_from_object)
}

fn from_root_array(payload: &Value) -> Option<ExtractedContent> {
    payload.as_array()?.iter().find_map(content_from_object)
}

fn content_from_object(value: &Value) -> Option<ExtractedContent> {
    let obj = value.as_object()?;
    let markdown = obj.get("markdown")?.as_str()?;
    if markdown.trim().is_empty() {
        return None;
    }

    Some(ExtractedContent {
        markdown: markdown.to_string(),
        html: obj
            .get("html")
            .and_then(Value::as_str)
            .filter(|html| !html.is_empty())
            .map(str::to_string),
        metadata: obj
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_shape() {
        let content = extract_content(&json!({
            "markdown": "# Hello",
            "html": "<h1>Hello</h1>",
            "metadata": {"title": "Hello"}
        }))
        .unwrap();
        assert_eq!(content.markdown, "# Hello");
        assert_eq!(content.html.as_deref(), Some("<h1>Hello</h1>"));
        assert_eq!(content.metadata.get("title"), Some(&json!("Hello")));
    }

    #[test]
    fn test_data_object_shape() {
        let content = extract_content(&json!({"success": true, "data": {"markdown": "body"}})).unwrap();
        assert_eq!(content.markdown, "body");
        assert!(content.metadata.is_empty());
    }

    #[test]
    fn test_first_non_empty_array_item_wins() {
        let content = extract_content(&json!({
            "status": "completed",
            "data": [{"markdown": ""}, {"markdown": "hello"}, {"markdown": "later"}]
        }))
        .unwrap();
        assert_eq!(content.markdown, "hello");
    }

    #[test]
    fn test_root_array_shape() {
        let content = extract_content(&json!([{"html": "<p/>"}, {"markdown": "from root"}])).unwrap();
        assert_eq!(content.markdown, "from root");
    }

    #[test]
    fn test_top_level_has_priority_over_data() {
        let content = extract_content(&json!({
            "markdown": "outer",
            "data": {"markdown": "inner"}
        }))
        .unwrap();
        assert_eq!(content.markdown, "outer");
    }

    #[test]
    fn test_unknown_shapes_yield_none() {
        assert!(extract_content(&json!({"id": "job-1", "url": "http://x"})).is_none());
        assert!(extract_content(&json!("plain string")).is_none());
        assert!(extract_content(&json!(null)).is_none());
        assert!(extract_content(&json!({"data": 5})).is_none());
        assert!(extract_content(&json!({"markdown": 12})).is_none());
    }

    #[test]
    fn test_whitespace_markdown_is_not_content() {
        assert!(extract_content(&json!({"data": [{"markdown": "  \n\t"}]})).is_none());
    }

    #[test]
    fn test_has_content_fields() {
        assert!(has_content_fields(&json!({"data": []})));
        assert!(has_content_fields(&json!([])));
        assert!(!has_content_fields(&json!({"error": "nope"})));
    }
}
