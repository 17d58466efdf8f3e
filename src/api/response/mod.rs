pub mod feature_state;
pub mod get_layer_info;
pub mod get_user_tenants;
pub mod read_data;

/* Deserializers for fields the portal encodes inconsistently */
pub mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Accepts `12.5`, `"12.5"` and `null`. Strings that are not numbers read as absent.
    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Value::deserialize(d)? {
            Value::Number(n) => Ok(n.as_f64()),
            Value::String(s) => Ok(s.trim().parse().ok().filter(|v: &f64| v.is_finite())),
            _ => Ok(None),
        }
    }

    /// Lists that may be `null` or hold items of unexpected shape. Anything but an array reads
    /// as empty, unreadable items are dropped.
    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        match Value::deserialize(d)? {
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match serde_json::from_value(item) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        log::debug!("skipping unreadable list item: {}", e);
                        None
                    }
                })
                .collect()),
            Value::Null => Ok(Vec::new()),
            other => {
                log::debug!("expected a list, got {}", other);
                Ok(Vec::new())
            }
        }
    }

    /// Identifiers are strings in most responses but plain numbers in some.
    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number, got {}",
                other
            ))),
        }
    }
}
