//! Stored data contracts
//!
//! Field names serialize in camelCase to match what the protocol layer
//! writes. Every byte field is a [`Binary`], so private key material is wiped
//! when the owning value is dropped.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::codec::{self, Binary};
use crate::error::{AuthStateError, Result};

/// Curve25519 key pair. Both halves are raw 32-byte keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: Binary,
    pub private: Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedKeyPair {
    pub key_pair: KeyPair,
    pub signature: Binary,
    pub key_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_s: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Signed device identity issued at pairing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Binary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_signature_key: Option<Binary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_signature: Option<Binary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_signature: Option<Binary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolAddress {
    pub name: String,
    pub device_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalIdentity {
    pub identifier: ProtocolAddress,
    pub identifier_key: Binary,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMac {
    pub value_mac: Binary,
}

/// App-state collection version plus its LT-hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LtHashState {
    pub version: u64,
    pub hash: Binary,
    /// Keyed by base64 index MAC.
    #[serde(default)]
    pub index_value_map: BTreeMap<String, ValueMac>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisappearingMode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_expiration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_setting_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    #[serde(default)]
    pub unarchive_chats: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_disappearing_mode: Option<DisappearingMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMethod {
    Sms,
    Voice,
    Captcha,
}

/// Phone-number registration parameters. Empty until registration starts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone_number_country_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone_number_national_number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone_number_mobile_country_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone_number_mobile_network_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<RegistrationMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captcha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fingerprint {
    pub raw_id: u32,
    pub current_index: u32,
    pub device_indexes: Vec<u32>,
}

/// App-state sync key shared by the primary device.
///
/// Stored copies come in several shapes (see [`AppStateSyncKeyData::from_stored`]),
/// so deserialization always goes through that reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyData {
    pub key_data: Binary,
    pub fingerprint: Fingerprint,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

fn malformed(msg: impl std::fmt::Display) -> AuthStateError {
    AuthStateError::Serialization(<serde_json::Error as serde::de::Error>::custom(msg))
}

impl AppStateSyncKeyData {
    /// Rebuild from a generic stored object.
    ///
    /// `keyData` may be a binary tag, a base64 string or a byte array.
    /// `timestamp` may be a number, a numeric string or a `{low, high}` long.
    /// Missing fields take their defaults.
    pub fn from_stored(node: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut fields) = node else {
            return Err(malformed("app-state sync key must be an object"));
        };

        let key_data = match fields.remove("keyData") {
            None | Some(serde_json::Value::Null) => Binary::default(),
            Some(node) => Binary::from_tagged(&node)
                .or_else(|| codec::bytes_from_json(&node).map(Binary::new))
                .ok_or_else(|| AuthStateError::MalformedBinary("keyData is not binary".into()))?,
        };
        let fingerprint = match fields.remove("fingerprint") {
            None | Some(serde_json::Value::Null) => Fingerprint::default(),
            Some(node) => codec::decode_json(node)?,
        };
        let timestamp = match fields.remove("timestamp") {
            None | Some(serde_json::Value::Null) => 0,
            Some(node) => long_from_json(&node)
                .ok_or_else(|| malformed(format!("timestamp {} is not a number", node)))?,
        };

        Ok(Self {
            key_data,
            fingerprint,
            timestamp,
        })
    }
}

/// Numbers, numeric strings and protobuf `{low, high}` longs.
fn long_from_json(node: &serde_json::Value) -> Option<i64> {
    match node {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Object(fields) => {
            let low = fields.get("low")?.as_i64()?;
            let high = fields.get("high")?.as_i64()?;
            Some((high << 32) | i64::from(low as u32))
        }
        _ => None,
    }
}

impl<'de> Deserialize<'de> for AppStateSyncKeyData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let node = serde_json::Value::deserialize(deserializer)?;
        Self::from_stored(node).map_err(serde::de::Error::custom)
    }
}

/// Long-lived identity and registration state of one session.
///
/// Fields this crate does not model are kept in `extra` and written back
/// unchanged on save.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationCreds {
    pub noise_key: KeyPair,
    pub pairing_ephemeral_key_pair: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedKeyPair,
    pub registration_id: u32,
    pub adv_secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_identities: Option<Vec<SignalIdentity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_app_state_key_id: Option<String>,
    pub first_unuploaded_pre_key_id: u32,
    pub next_pre_key_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_account_sync_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub processed_history_messages: Vec<codec::Value>,
    #[serde(default)]
    pub account_sync_counter: u32,
    #[serde(default)]
    pub account_settings: AccountSettings,
    pub device_id: String,
    pub phone_id: String,
    pub identity_id: Binary,
    #[serde(default)]
    pub registered: bool,
    pub backup_token: Binary,
    #[serde(default)]
    pub registration: RegistrationOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prop_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_info: Option<Binary>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, codec::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_key_pair_wire_shape() {
        let pair = KeyPair {
            public: Binary::new(vec![1, 2, 3]),
            private: Binary::new(vec![4, 5, 6]),
        };
        let text = codec::encode(&pair).unwrap();
        assert_eq!(
            text,
            r#"{"public":{"type":"Buffer","data":[1,2,3]},"private":{"type":"Buffer","data":[4,5,6]}}"#
        );
        assert_eq!(codec::decode::<KeyPair>(&text).unwrap(), pair);
    }

    #[test]
    fn test_signed_key_pair_camel_case() {
        let signed = SignedKeyPair {
            key_id: 1,
            ..Default::default()
        };
        let node = serde_json::to_value(&signed).unwrap();
        assert!(node.get("keyPair").is_some());
        assert_eq!(node["keyId"], json!(1));
        assert!(node.get("timestampS").is_none());
    }

    #[test]
    fn test_creds_keep_unknown_fields() {
        let mut creds = AuthenticationCreds {
            registration_id: 77,
            device_id: "dev".into(),
            ..Default::default()
        };
        creds
            .extra
            .insert("lastAccountTypeSync".into(), codec::Value::String("x".into()));

        let text = codec::encode(&creds).unwrap();
        let back: AuthenticationCreds = codec::decode(&text).unwrap();
        assert_eq!(back, creds);
        assert!(text.contains(r#""lastAccountTypeSync":"x""#));
        assert!(text.contains(r#""registrationId":77"#));
    }

    #[rstest]
    #[case(json!(1700000000000i64), 1_700_000_000_000)]
    #[case(json!("1700000000000"), 1_700_000_000_000)]
    #[case(json!({"low": 1, "high": 1, "unsigned": false}), (1i64 << 32) + 1)]
    #[case(json!({"low": -1, "high": 0}), 4_294_967_295)]
    #[case(json!(12.9), 12)]
    fn test_timestamp_forms(#[case] raw: serde_json::Value, #[case] expected: i64) {
        let key = AppStateSyncKeyData::from_stored(json!({
            "keyData": [9, 9],
            "timestamp": raw,
        }))
        .unwrap();
        assert_eq!(key.timestamp, expected);
    }

    #[rstest]
    #[case(json!({"type": "Buffer", "data": [1, 2, 3]}))]
    #[case(json!("AQID"))]
    #[case(json!([1, 2, 3]))]
    fn test_key_data_forms(#[case] raw: serde_json::Value) {
        let key = AppStateSyncKeyData::from_stored(json!({"keyData": raw})).unwrap();
        assert_eq!(key.key_data.as_bytes(), &[1, 2, 3]);
        assert_eq!(key.timestamp, 0);
        assert_eq!(key.fingerprint, Fingerprint::default());
    }

    #[test]
    fn test_sync_key_rejects_garbage() {
        assert!(AppStateSyncKeyData::from_stored(json!([1, 2])).is_err());
        assert!(AppStateSyncKeyData::from_stored(json!({"keyData": true})).is_err());
        assert!(AppStateSyncKeyData::from_stored(json!({"timestamp": "soon"})).is_err());
    }

    #[test]
    fn test_sync_key_roundtrip() {
        let key = AppStateSyncKeyData {
            key_data: Binary::new(vec![7; 32]),
            fingerprint: Fingerprint {
                raw_id: 5,
                current_index: 1,
                device_indexes: vec![0, 1],
            },
            timestamp: 1_700_000_000_000,
        };
        let text = codec::encode(&key).unwrap();
        assert_eq!(codec::decode::<AppStateSyncKeyData>(&text).unwrap(), key);
    }
}
