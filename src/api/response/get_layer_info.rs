use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
pub struct GetLayerInfo {
    #[serde(default)]
    pub views: Vec<Value>,
    #[serde(default)]
    pub periods: Vec<Value>,
    #[serde(default)]
    pub scales: Vec<Value>,
}

/// Views, periods and scales arrive either as plain strings or as objects carrying their key.
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_owned()),
        Value::Object(map) => ["dlgKey", "key", "id"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(str::to_owned),
        _ => None,
    }
}

pub fn keys(values: &[Value]) -> Vec<String> {
    values.iter().filter_map(key_of).collect()
}
