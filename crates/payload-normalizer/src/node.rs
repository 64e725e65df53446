use serde_json::Value;

use types::Scalar;

use crate::NormalizeError;

/// Key under which some publishers re-wrap the whole payload as a JSON string.
const WRAPPER_KEY: &str = "value";

/// Typed view of a decoded payload tree. Object key order is preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Absent,
    Scalar(Scalar),
    Map(Vec<(String, Node)>),
    List(usize),
}

impl Node {
    pub fn as_map(&self) -> Option<&[(String, Node)]> {
        match self {
            Node::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map()?
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, node)| node)
    }

    pub fn describe(&self) -> String {
        match self {
            Node::Absent => "null".to_string(),
            Node::Scalar(value) => value.to_string(),
            Node::Map(entries) => format!("object with {} keys", entries.len()),
            Node::List(len) => format!("array of {len}"),
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Absent,
            Value::Bool(flag) => Node::Scalar(Scalar::Int(i64::from(flag))),
            Value::Number(number) => match number.as_i64() {
                Some(int) => Node::Scalar(Scalar::Int(int)),
                None => Node::Scalar(Scalar::Float(number.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(text) => Node::Scalar(Scalar::Text(text)),
            Value::Array(items) => Node::List(items.len()),
            Value::Object(map) => {
                Node::Map(map.into_iter().map(|(key, value)| (key, Node::from(value))).collect())
            }
        }
    }
}

/// Parses raw bytes into a node tree, unwrapping one `{"value": "<json>"}` level.
pub fn decode(raw: &[u8]) -> Result<Node, NormalizeError> {
    let value: Value = serde_json::from_slice(raw)?;
    let wrapped = match &value {
        Value::Object(map) if map.len() == 1 => map
            .get(WRAPPER_KEY)
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    };
    let value = match wrapped {
        Some(inner) => serde_json::from_str(&inner)?,
        None => value,
    };
    Ok(Node::from(value))
}
