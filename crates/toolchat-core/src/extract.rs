//! Tool-call extraction
//!
//! Models wrap tool requests in prose or code fences, so the candidate JSON
//! is everything between the first `{` and the last `}`. This cannot tell
//! two JSON objects apart and ignores braces that belong to unrelated text;
//! such replies simply fail to parse and count as final answers.

use serde_json::{Map, Value};

/// Which kind of tool request the model asked for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Schema,
    Execute,
}

impl RequestKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Execute => "execute",
        }
    }
}

/// A tool request recovered from assistant text
#[derive(Clone, Debug, PartialEq)]
pub enum ToolRequest {
    /// `{"tool_request": "schema", "tool_name": ...}`
    Schema { tool_name: String },

    /// `{"tool_request": "execute", "tool_name": ..., "arguments": {...}}`
    Execute {
        tool_name: String,
        arguments: Map<String, Value>,
    },

    /// A recognised request with missing or mistyped fields
    Malformed { kind: RequestKind, reason: String },
}

impl ToolRequest {
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Schema { .. } => RequestKind::Schema,
            Self::Execute { .. } => RequestKind::Execute,
            Self::Malformed { kind, .. } => *kind,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::Schema { tool_name } | Self::Execute { tool_name, .. } => Some(tool_name),
            Self::Malformed { .. } => None,
        }
    }

    /// Status line for the request, e.g. `Execution of add`
    pub fn describe(&self) -> String {
        let name = self.tool_name().unwrap_or("a malformed request");
        match self.kind() {
            RequestKind::Schema => format!("Schema for {name}"),
            RequestKind::Execute => format!("Execution of {name}"),
        }
    }
}

/// Scan assistant text for an embedded tool request.
///
/// `None` means "not a tool call", which is the normal final-answer case.
pub fn extract(text: &str) -> Option<ToolRequest> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(&text[start..=end]) else {
        return None;
    };

    let kind = match object.get("tool_request")?.as_str()? {
        "schema" => RequestKind::Schema,
        "execute" => RequestKind::Execute,
        _ => return None,
    };

    let tool_name = match object.remove("tool_name") {
        Some(Value::String(name)) => name,
        Some(_) => return Some(malformed(kind, "'tool_name' must be a string")),
        None => return Some(malformed(kind, "missing 'tool_name'")),
    };

    match kind {
        RequestKind::Schema => Some(ToolRequest::Schema { tool_name }),
        RequestKind::Execute => match object.remove("arguments") {
            Some(Value::Object(arguments)) => Some(ToolRequest::Execute {
                tool_name,
                arguments,
            }),
            Some(_) => Some(malformed(kind, "'arguments' must be an object")),
            None => Some(malformed(kind, "missing 'arguments'")),
        },
    }
}

fn malformed(kind: RequestKind, reason: &str) -> ToolRequest {
    ToolRequest::Malformed {
        kind,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_plain_text_is_not_a_tool_call() {
        assert_eq!(extract("The answer is 12."), None);
        assert_eq!(extract(""), None);
        assert_eq!(extract("only an opening {"), None);
        assert_eq!(extract("only a closing }"), None);
        assert_eq!(extract("reversed } then {"), None);
    }

    #[test]
    fn test_execute_inside_prose() {
        let text = r#"Sure, let me add those.
```json
{"tool_request":"execute","tool_name":"add","arguments":{"a":5,"b":7}}
```
One moment."#;

        assert_eq!(
            extract(text),
            Some(ToolRequest::Execute {
                tool_name: "add".into(),
                arguments: args(json!({"a": 5, "b": 7})),
            })
        );
    }

    #[test]
    fn test_schema_request() {
        let text = r#"{"tool_request": "schema", "tool_name": "add"}"#;
        assert_eq!(
            extract(text),
            Some(ToolRequest::Schema {
                tool_name: "add".into()
            })
        );
    }

    #[test]
    fn test_invalid_json_is_not_a_tool_call() {
        assert_eq!(extract(r#"{"tool_request": "schema", "tool_name": }"#), None);
    }

    #[test]
    fn test_json_without_tool_request_is_not_a_tool_call() {
        assert_eq!(extract(r#"Here is data: {"a": 1}"#), None);
    }

    #[test]
    fn test_unknown_request_kind_is_not_a_tool_call() {
        assert_eq!(extract(r#"{"tool_request": "list", "tool_name": "add"}"#), None);
    }

    #[test]
    fn test_two_objects_defeat_the_heuristic() {
        let text = r#"{"tool_request": "schema", "tool_name": "add"} and {"x": 1}"#;
        assert_eq!(extract(text), None);
    }

    #[test]
    fn test_missing_tool_name_is_malformed() {
        let request = extract(r#"{"tool_request": "schema"}"#).unwrap();
        assert_eq!(request.kind(), RequestKind::Schema);
        assert!(matches!(request, ToolRequest::Malformed { .. }));
        assert_eq!(request.tool_name(), None);
        assert_eq!(request.describe(), "Schema for a malformed request");
    }

    #[test]
    fn test_missing_arguments_is_malformed() {
        let request = extract(r#"{"tool_request": "execute", "tool_name": "add"}"#).unwrap();
        assert_eq!(
            request,
            ToolRequest::Malformed {
                kind: RequestKind::Execute,
                reason: "missing 'arguments'".into(),
            }
        );
    }

    #[test]
    fn test_non_object_arguments_is_malformed() {
        let request =
            extract(r#"{"tool_request": "execute", "tool_name": "add", "arguments": [1, 2]}"#)
                .unwrap();
        assert!(matches!(
            request,
            ToolRequest::Malformed {
                kind: RequestKind::Execute,
                ..
            }
        ));
    }
}
