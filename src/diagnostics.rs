//! Redacted dump of the coordinator state, safe to attach to bug reports.

use crate::coordinator::Coordinator;
use crate::mapper::TENANT_INFO;
use serde_json::{json, Map, Value};

const REDACTED: &str = "**REDACTED**";

/* fields identifying a person or a dwelling */
const PERSONAL: [&str; 9] = [
    "name",
    "email",
    "street",
    "house_number",
    "postal_code",
    "city",
    "user_number",
    "property_number",
    "unit_number",
];

fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let is_tenant_info = map.get("key").and_then(Value::as_str) == Some(TENANT_INFO);

            Value::Object(
                map.into_iter()
                    .map(|(key, value)| {
                        let personal = PERSONAL.contains(&key.as_str())
                            || (is_tenant_info && key == "value");
                        if personal && !value.is_null() {
                            (key, Value::from(REDACTED))
                        } else {
                            (key, redact(value))
                        }
                    })
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(values) => Value::Array(values.into_iter().map(redact).collect()),
        other => other,
    }
}

pub fn diagnostics(coordinator: &Coordinator) -> Value {
    /* tenants as a list, the snapshot is keyed by user number */
    let tenants: Vec<Value> = coordinator
        .snapshot()
        .into_values()
        .map(|tenant| redact(serde_json::to_value(tenant).unwrap_or_default()))
        .collect();

    json!({
        "status": redact(serde_json::to_value(coordinator.status()).unwrap_or_default()),
        "tenants": tenants,
    })
}
