//! Key categories and their value types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::types::{AppStateSyncKeyData, KeyPair, LtHashState};
use crate::codec::{self, Binary};
use crate::error::Result;

/// The six namespaces of keyed material within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCategory {
    Session,
    PreKey,
    SenderKey,
    AppStateSyncKey,
    AppStateSyncVersion,
    SenderKeyMemory,
}

impl KeyCategory {
    pub const ALL: [KeyCategory; 6] = [
        Self::Session,
        Self::PreKey,
        Self::SenderKey,
        Self::AppStateSyncKey,
        Self::AppStateSyncVersion,
        Self::SenderKeyMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::PreKey => "pre-key",
            Self::SenderKey => "sender-key",
            Self::AppStateSyncKey => "app-state-sync-key",
            Self::AppStateSyncVersion => "app-state-sync-version",
            Self::SenderKeyMemory => "sender-key-memory",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Row id of `id` within this category, e.g. `pre-key-7`.
    pub fn item_id(&self, id: &str) -> String {
        format!("{}-{}", self.as_str(), id)
    }
}

impl fmt::Display for KeyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            let known: Vec<_> = Self::ALL.iter().map(KeyCategory::as_str).collect();
            format!("unknown key category `{}` (expected one of: {})", s, known.join(", "))
        })
    }
}

/// Serialized session record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRecord(pub Binary);

/// Serialized sender-key record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderKeyRecord(pub Binary);

/// Which group members already hold our sender key, by JID.
pub type SenderKeyMemory = BTreeMap<String, bool>;

type Entries<V> = Option<HashMap<String, Option<V>>>;

/// A value type bound to exactly one category.
pub trait CategoryValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    const CATEGORY: KeyCategory;

    /// Build the typed value from stored JSON.
    fn from_stored(node: serde_json::Value) -> Result<Self> {
        codec::decode_json(node)
    }

    /// This category's slot in a [`SignalDataSet`].
    fn entries(set: &mut SignalDataSet) -> &mut Entries<Self>;
}

impl CategoryValue for SessionRecord {
    const CATEGORY: KeyCategory = KeyCategory::Session;

    fn entries(set: &mut SignalDataSet) -> &mut Entries<Self> {
        &mut set.session
    }
}

impl CategoryValue for KeyPair {
    const CATEGORY: KeyCategory = KeyCategory::PreKey;

    fn entries(set: &mut SignalDataSet) -> &mut Entries<Self> {
        &mut set.pre_key
    }
}

impl CategoryValue for SenderKeyRecord {
    const CATEGORY: KeyCategory = KeyCategory::SenderKey;

    fn entries(set: &mut SignalDataSet) -> &mut Entries<Self> {
        &mut set.sender_key
    }
}

impl CategoryValue for AppStateSyncKeyData {
    const CATEGORY: KeyCategory = KeyCategory::AppStateSyncKey;

    fn from_stored(node: serde_json::Value) -> Result<Self> {
        AppStateSyncKeyData::from_stored(node)
    }

    fn entries(set: &mut SignalDataSet) -> &mut Entries<Self> {
        &mut set.app_state_sync_key
    }
}

impl CategoryValue for LtHashState {
    const CATEGORY: KeyCategory = KeyCategory::AppStateSyncVersion;

    fn entries(set: &mut SignalDataSet) -> &mut Entries<Self> {
        &mut set.app_state_sync_version
    }
}

impl CategoryValue for SenderKeyMemory {
    const CATEGORY: KeyCategory = KeyCategory::SenderKeyMemory;

    fn entries(set: &mut SignalDataSet) -> &mut Entries<Self> {
        &mut set.sender_key_memory
    }
}

/// A batch of writes and deletions across categories.
///
/// A missing category leaves that category untouched. Within a category, a
/// `Some` value is stored and a `None` value deletes the id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SignalDataSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Entries<SessionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_key: Entries<KeyPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_key: Entries<SenderKeyRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state_sync_key: Entries<AppStateSyncKeyData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state_sync_version: Entries<LtHashState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_key_memory: Entries<SenderKeyMemory>,
}

impl SignalDataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write.
    pub fn put<V: CategoryValue>(mut self, id: impl Into<String>, value: V) -> Self {
        V::entries(&mut self)
            .get_or_insert_with(HashMap::new)
            .insert(id.into(), Some(value));
        self
    }

    /// Queue a deletion.
    pub fn delete<V: CategoryValue>(mut self, id: impl Into<String>) -> Self {
        V::entries(&mut self)
            .get_or_insert_with(HashMap::new)
            .insert(id.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none()
            && self.pre_key.is_none()
            && self.sender_key.is_none()
            && self.app_state_sync_key.is_none()
            && self.app_state_sync_version.is_none()
            && self.sender_key_memory.is_none()
    }
}
