use crate::host::{number_to_json, Value};

/// Nesting depth used when a composite is rendered for comparison.
pub const COMPARE_DEPTH: usize = 6;

/// Comparable recorded for a watch whose path does not currently resolve.
pub const UNRESOLVED: &str = "!err";

/// Type-discriminated string form used for change detection.
///
/// Values of different types never collide (`n:1` vs `s:1`), and the three
/// non-finite numbers stay distinct from each other and from finite ones.
pub fn comparable(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => format!("b:{b}"),
        Value::Number(n) => format!("n:{}", number_text(*n)),
        Value::Str(s) => format!("s:{s}"),
        Value::List(_) | Value::Map(_) => format!("t:{}", value.to_json(COMPARE_DEPTH)),
        Value::Native(object) => match object.to_json() {
            Ok(json) => format!("o:{json}"),
            Err(_) => format!("o:[{}]", object.type_name()),
        },
    }
}

fn number_text(n: f64) -> String {
    match number_to_json(n) {
        serde_json::Value::String(label) => label,
        json => json.to_string(),
    }
}
