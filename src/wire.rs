use serde::Deserialize;
use serde_json::Value;

/// Error body returned by the fabric service on non-success responses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[serde(default, alias = "code")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub causes: Option<Vec<String>>,
    #[serde(default, alias = "isCritical")]
    pub critical: Option<bool>,
    #[serde(default)]
    pub notes: Option<Value>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, alias = "trackingID")]
    pub tracking_id: Option<String>,
}

/// Renders a free-form JSON value as text; strings lose their quotes.
pub fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}
