//! Policy and configuration body comparison

use serde_json::Value;

/// How desired and existing JSON bodies are compared
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PolicyCompare {
    /// Structural equality: key order is ignored, array order is significant
    #[default]
    Exact,
    /// Also ignores array order and treats a one-element array as its element
    Normalized,
}

impl PolicyCompare {
    /// Whether two bodies describe the same configuration.
    ///
    /// Bodies that are not JSON compare as plain strings.
    pub fn equivalent(self, existing: &str, desired: &str) -> bool {
        let (Ok(a), Ok(b)) = (
            serde_json::from_str::<Value>(existing),
            serde_json::from_str::<Value>(desired),
        ) else {
            return existing == desired;
        };

        match self {
            PolicyCompare::Exact => a == b,
            PolicyCompare::Normalized => normalize(a) == normalize(b),
        }
    }
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, normalize(v))).collect()),
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(normalize).collect();
            if items.len() == 1 {
                return items.remove(0);
            }
            items.sort_by_cached_key(|v| v.to_string());
            Value::Array(items)
        }
        other => other,
    }
}
