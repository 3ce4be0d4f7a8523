use serde::{Deserialize, Serialize};

/// The type of a single row-key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Int,
    Long,
    String,
    ByteArray,
}

impl KeyType {
    /// The smallest value of this type.
    ///
    /// Ranges covering the full key space start here.
    pub fn min_value(&self) -> KeyValue {
        match self {
            KeyType::Int => KeyValue::Int(i32::MIN),
            KeyType::Long => KeyValue::Long(i64::MIN),
            KeyType::String => KeyValue::String(String::new()),
            KeyType::ByteArray => KeyValue::ByteArray(Vec::new()),
        }
    }
}

/// The value of a single row-key field.
///
/// Values are only compared against values of the same type. The ordering
/// of byte arrays is unsigned lexicographic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyValue {
    Int(i32),
    Long(i64),
    String(String),
    ByteArray(Vec<u8>),
}

impl KeyValue {
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyValue::Int(_) => KeyType::Int,
            KeyValue::Long(_) => KeyType::Long,
            KeyValue::String(_) => KeyType::String,
            KeyValue::ByteArray(_) => KeyType::ByteArray,
        }
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Long(v) => write!(f, "{v}"),
            KeyValue::String(v) => write!(f, "{v:?}"),
            KeyValue::ByteArray(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Int(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Long(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::String(value.to_owned())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::String(value)
    }
}

impl From<Vec<u8>> for KeyValue {
    fn from(value: Vec<u8>) -> Self {
        KeyValue::ByteArray(value)
    }
}

/// A full row key, with one value per row-key field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(pub Vec<KeyValue>);

impl Key {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    /// Return the value for the given dimension, if present.
    pub fn get(&self, dimension: usize) -> Option<&KeyValue> {
        self.0.get(dimension)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<KeyValue> for Key {
    fn from(value: KeyValue) -> Self {
        Key(vec![value])
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key(vec![KeyValue::Long(value)])
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(vec![KeyValue::from(value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_value_is_smallest() {
        assert!(KeyType::Long.min_value() <= KeyValue::Long(i64::MIN));
        assert!(KeyType::Int.min_value() < KeyValue::Int(-5));
        assert!(KeyType::String.min_value() < KeyValue::from("a"));
        assert!(KeyType::ByteArray.min_value() < KeyValue::ByteArray(vec![0]));
    }

    #[test]
    fn test_byte_arrays_compare_unsigned() {
        assert!(KeyValue::ByteArray(vec![0x01]) < KeyValue::ByteArray(vec![0xff]));
        assert!(KeyValue::ByteArray(vec![0x01]) < KeyValue::ByteArray(vec![0x01, 0x00]));
    }

    #[test]
    fn test_key_serde_is_transparent() {
        let key = Key::new(vec![KeyValue::Long(42), KeyValue::from("a")]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"[{"long":42},{"string":"a"}]"#);
        assert_eq!(serde_json::from_str::<Key>(&json).unwrap(), key);
    }
}
