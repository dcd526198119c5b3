//! Binary-safe JSON codec
//!
//! Stored values are JSON text. Raw key material has no JSON representation,
//! so every byte buffer is written as a tagged object:
//!
//! ```json
//! { "type": "Buffer", "data": [1, 2, 3] }
//! ```
//!
//! Tag schema (version 1):
//! - `type` is the buffer kind, `"Buffer"` or `"Uint8Array"`.
//! - `data` is an array of byte values. On read, a base64 string is accepted too.
//! - No other keys. An object with extra keys is ordinary data.
//!
//! Typed records embed [`Binary`] fields, whose serde impls produce and consume
//! the tag. Untyped payloads go through [`Value`], which walks the tree and
//! swaps tagged objects for binary leaves (and back).

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::{SerializeMap, SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AuthStateError, Result};

const TYPE_KEY: &str = "type";
const DATA_KEY: &str = "data";

/// Discriminator written into the `type` field of a binary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BinaryKind {
    #[default]
    Buffer,
    Uint8Array,
}

impl BinaryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffer => "Buffer",
            Self::Uint8Array => "Uint8Array",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Buffer" => Some(Self::Buffer),
            "Uint8Array" => Some(Self::Uint8Array),
            _ => None,
        }
    }
}

/// Owned byte buffer that serializes as a binary tag.
///
/// Contents are wiped on drop. `Debug` prints the length only.
#[derive(Clone, PartialEq, Eq, Hash, Default, Zeroize, ZeroizeOnDrop)]
pub struct Binary {
    #[zeroize(skip)]
    kind: BinaryKind,
    bytes: Vec<u8>,
}

impl Binary {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: BinaryKind::Buffer,
            bytes: bytes.into(),
        }
    }

    pub fn with_kind(kind: BinaryKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
        }
    }

    pub fn kind(&self) -> BinaryKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reconstruct a binary leaf from an already-parsed JSON node.
    ///
    /// Returns `None` when the node is not a well-formed tag.
    pub fn from_tagged(node: &serde_json::Value) -> Option<Self> {
        let obj = node.as_object()?;
        if obj.len() != 2 {
            return None;
        }
        let kind = BinaryKind::from_tag(obj.get(TYPE_KEY)?.as_str()?)?;
        let bytes = bytes_from_json(obj.get(DATA_KEY)?)?;
        Some(Self { kind, bytes })
    }

    /// The tag object for this buffer.
    pub fn to_tagged(&self) -> serde_json::Value {
        let data = self
            .bytes
            .iter()
            .map(|b| serde_json::Value::from(*b))
            .collect();
        let mut obj = serde_json::Map::with_capacity(2);
        obj.insert(TYPE_KEY.to_string(), self.kind.as_str().into());
        obj.insert(DATA_KEY.to_string(), serde_json::Value::Array(data));
        serde_json::Value::Object(obj)
    }
}

impl From<Vec<u8>> for Binary {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Binary {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl<const N: usize> From<[u8; N]> for Binary {
    fn from(bytes: [u8; N]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Binary {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binary({}, {} bytes)", self.kind.as_str(), self.bytes.len())
    }
}

/// Decode the `data` field of a tag: byte array or base64 string.
pub(crate) fn bytes_from_json(data: &serde_json::Value) -> Option<Vec<u8>> {
    match data {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect(),
        serde_json::Value::String(encoded) => STANDARD.decode(encoded).ok(),
        _ => None,
    }
}

impl Serialize for Binary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tag = serializer.serialize_struct("Binary", 2)?;
        tag.serialize_field(TYPE_KEY, self.kind.as_str())?;
        tag.serialize_field(DATA_KEY, self.bytes.as_slice())?;
        tag.end()
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let node = serde_json::Value::deserialize(deserializer)?;
        Self::from_tagged(&node).ok_or_else(|| {
            de::Error::custom(format!(
                "expected {{\"type\": \"Buffer\", \"data\": [...]}}, found {}",
                describe(&node)
            ))
        })
    }
}

fn describe(node: &serde_json::Value) -> &'static str {
    match node {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an untagged object",
    }
}

/// Untyped stored value: plain JSON plus binary leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Binary(Binary),
}

impl Value {
    /// Replace every binary leaf with its tag object.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Binary(bin) => bin.to_tagged(),
        }
    }

    /// Walk parsed JSON and revive tag objects into binary leaves.
    pub fn from_json(node: serde_json::Value) -> Self {
        if let Some(bin) = Binary::from_tagged(&node) {
            return Self::Binary(bin);
        }
        match node {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => items.serialize(serializer),
            Self::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Binary(bin) => bin.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from_json)
    }
}

impl From<Binary> for Value {
    fn from(bin: Binary) -> Self {
        Self::Binary(bin)
    }
}

/// Serialize a value to stored JSON text.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(AuthStateError::from)
}

/// Parse stored JSON text. Malformed text is reported, never swallowed.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(AuthStateError::from)
}

/// Convert an already-parsed JSON node into a typed value.
pub fn decode_json<T: DeserializeOwned>(node: serde_json::Value) -> Result<T> {
    serde_json::from_value(node).map_err(AuthStateError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct KeyPairLike {
        public: Binary,
        private: Binary,
    }

    #[test]
    fn test_binary_wire_shape() {
        let text = encode(&Binary::new(vec![1u8, 2, 255])).unwrap();
        assert_eq!(text, r#"{"type":"Buffer","data":[1,2,255]}"#);
    }

    #[test]
    fn test_typed_record_roundtrip() {
        let pair = KeyPairLike {
            public: Binary::new(vec![1, 2, 3]),
            private: Binary::with_kind(BinaryKind::Uint8Array, vec![4, 5, 6]),
        };
        let text = encode(&pair).unwrap();
        let back: KeyPairLike = decode(&text).unwrap();
        assert_eq!(back, pair);
        assert_eq!(back.private.kind(), BinaryKind::Uint8Array);
    }

    #[test]
    fn test_base64_data_accepted() {
        let back: Binary = decode(r#"{"type":"Buffer","data":"AQID"}"#).unwrap();
        assert_eq!(back.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_untagged_object_rejected_for_binary() {
        let err = decode::<Binary>(r#"{"public":[1,2,3]}"#).unwrap_err();
        assert!(err.to_string().contains("untagged object"));
    }

    #[test]
    fn test_out_of_range_byte_is_not_a_tag() {
        let node = json!({"type": "Buffer", "data": [1, 256]});
        assert!(Binary::from_tagged(&node).is_none());
        assert!(matches!(Value::from_json(node), Value::Object(_)));
    }

    #[test]
    fn test_extra_keys_pass_through() {
        let node = json!({"type": "Buffer", "data": [1], "note": "x"});
        let value = Value::from_json(node.clone());
        assert!(matches!(value, Value::Object(_)));
        assert_eq!(value.to_json(), node);
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let node = json!({"type": "Blob", "data": [1, 2]});
        assert!(matches!(Value::from_json(node), Value::Object(_)));
    }

    #[test]
    fn test_nested_revival() {
        let node = json!({
            "keys": [{"type": "Buffer", "data": [9, 8]}],
            "count": 2,
            "name": "n"
        });
        let value = Value::from_json(node);
        let Value::Object(fields) = &value else {
            panic!("expected object");
        };
        let Value::Array(keys) = &fields["keys"] else {
            panic!("expected array");
        };
        assert_eq!(keys[0], Value::Binary(Binary::new(vec![9, 8])));
    }

    #[test]
    fn test_malformed_text_is_an_error() {
        let err = decode::<Value>("{not json").unwrap_err();
        assert!(matches!(err, AuthStateError::Serialization(_)));
    }

    #[test]
    fn test_debug_hides_bytes() {
        let rendered = format!("{:?}", Binary::new(vec![0xAA; 4]));
        assert_eq!(rendered, "Binary(Buffer, 4 bytes)");
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Number(n.into())),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
            (any::<bool>(), proptest::collection::vec(any::<u8>(), 0..24)).prop_map(
                |(u8a, bytes)| {
                    let kind = if u8a {
                        BinaryKind::Uint8Array
                    } else {
                        BinaryKind::Buffer
                    };
                    Value::Binary(Binary::with_kind(kind, bytes))
                }
            ),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::btree_map("k[a-z]{0,6}", inner, 0..6)
                    .prop_map(Value::Object),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_roundtrip_is_exact(value in arb_value()) {
            let text = encode(&value).unwrap();
            let back: Value = decode(&text).unwrap();
            prop_assert_eq!(back, value);
        }
    }
}
