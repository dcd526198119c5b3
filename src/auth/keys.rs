//! Typed key store over the session's rows

use async_trait::async_trait;
use std::collections::HashMap;

use super::category::{CategoryValue, SignalDataSet};
use crate::error::Result;
use crate::store::KeyedStore;

/// Key storage as consumed by the protocol layer.
#[async_trait]
pub trait SignalKeyStore: Send + Sync {
    /// Values for `ids` in `V`'s category. Ids with nothing stored are left out.
    async fn get<V: CategoryValue>(&self, ids: &[&str]) -> Result<HashMap<String, V>>;

    /// Apply a batch of writes and deletions.
    async fn set(&self, data: SignalDataSet) -> Result<()>;

    /// Remove every key of the session, keeping the credentials.
    async fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct KeyStore {
    store: KeyedStore,
}

impl KeyStore {
    pub fn new(store: KeyedStore) -> Self {
        Self { store }
    }

    /// Entries are applied one statement at a time, not in a transaction.
    async fn apply<V: CategoryValue>(
        &self,
        entries: Option<HashMap<String, Option<V>>>,
    ) -> Result<()> {
        let Some(entries) = entries else {
            return Ok(());
        };
        for (id, value) in entries {
            let item_id = V::CATEGORY.item_id(&id);
            match value {
                Some(value) => self.store.write(&item_id, &value).await?,
                None => self.store.remove(&item_id).await?,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SignalKeyStore for KeyStore {
    async fn get<V: CategoryValue>(&self, ids: &[&str]) -> Result<HashMap<String, V>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            let item_id = V::CATEGORY.item_id(id);
            if let Some(node) = self.store.read_json(&item_id).await? {
                found.insert((*id).to_string(), V::from_stored(node)?);
            }
        }
        tracing::debug!(
            "Loaded {}/{} {} key(s)",
            found.len(),
            ids.len(),
            V::CATEGORY
        );
        Ok(found)
    }

    async fn set(&self, data: SignalDataSet) -> Result<()> {
        let SignalDataSet {
            session,
            pre_key,
            sender_key,
            app_state_sync_key,
            app_state_sync_version,
            sender_key_memory,
        } = data;

        self.apply(session).await?;
        self.apply(pre_key).await?;
        self.apply(sender_key).await?;
        self.apply(app_state_sync_key).await?;
        self.apply(app_state_sync_version).await?;
        self.apply(sender_key_memory).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear_except_creds().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::category::{SenderKeyMemory, SessionRecord};
    use crate::auth::types::{AppStateSyncKeyData, KeyPair, LtHashState};
    use crate::codec::Binary;
    use crate::config::StoreConfig;
    use crate::db::{PoolManager, SqlParam};
    use serde_json::json;

    async fn test_keys() -> (KeyStore, KeyedStore) {
        let config = StoreConfig::sqlite(":memory:", "s1");
        let pool = PoolManager::new().acquire(&config).await.unwrap();
        let store = KeyedStore::from_config(pool, &config).unwrap();
        (KeyStore::new(store.clone()), store)
    }

    fn pre_key(seed: u8) -> KeyPair {
        KeyPair {
            public: Binary::new(vec![seed; 32]),
            private: Binary::new(vec![seed.wrapping_add(1); 32]),
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (keys, _) = test_keys().await;
        keys.set(SignalDataSet::new().put("1", pre_key(1)).put("2", pre_key(2)))
            .await
            .unwrap();

        let found = keys.get::<KeyPair>(&["1", "2", "3"]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["1"], pre_key(1));
        assert!(!found.contains_key("3"));
    }

    #[tokio::test]
    async fn test_rows_use_category_prefix() {
        let (keys, store) = test_keys().await;
        keys.set(SignalDataSet::new().put("abc.0", SessionRecord(Binary::new(vec![5]))))
            .await
            .unwrap();

        let rows = store.query("SELECT id FROM auth", &[]).await.unwrap();
        assert_eq!(rows[0]["id"], json!("session-abc.0"));
    }

    #[tokio::test]
    async fn test_none_deletes() {
        let (keys, _) = test_keys().await;
        keys.set(SignalDataSet::new().put("1", pre_key(1)).put("2", pre_key(2)))
            .await
            .unwrap();
        keys.set(SignalDataSet::new().delete::<KeyPair>("1"))
            .await
            .unwrap();

        let found = keys.get::<KeyPair>(&["1", "2"]).await.unwrap();
        assert!(!found.contains_key("1"));
        assert!(found.contains_key("2"));
    }

    #[tokio::test]
    async fn test_missing_category_untouched() {
        let (keys, _) = test_keys().await;
        keys.set(SignalDataSet::new().put("1", pre_key(1))).await.unwrap();
        keys.set(SignalDataSet::new().put("x", SessionRecord(Binary::new(vec![1]))))
            .await
            .unwrap();
        keys.set(SignalDataSet::new()).await.unwrap();

        assert_eq!(keys.get::<KeyPair>(&["1"]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sender_key_memory_and_versions() {
        let (keys, _) = test_keys().await;
        let memory: SenderKeyMemory = [("a@s.whatsapp.net".to_string(), true)].into();
        let version = LtHashState {
            version: 3,
            hash: Binary::new(vec![0; 128]),
            ..Default::default()
        };
        keys.set(
            SignalDataSet::new()
                .put("group@g.us", memory.clone())
                .put("regular", version.clone()),
        )
        .await
        .unwrap();

        let got = keys.get::<SenderKeyMemory>(&["group@g.us"]).await.unwrap();
        assert_eq!(got["group@g.us"], memory);
        let got = keys.get::<LtHashState>(&["regular"]).await.unwrap();
        assert_eq!(got["regular"], version);
    }

    #[tokio::test]
    async fn test_sync_key_reconstructed_from_generic_shape() {
        let (keys, store) = test_keys().await;
        let stored = json!({
            "keyData": "AQID",
            "fingerprint": {"rawId": 1, "currentIndex": 0, "deviceIndexes": [0]},
            "timestamp": {"low": 100, "high": 0, "unsigned": false},
        });
        store
            .query(
                "INSERT INTO auth (session, id, value) VALUES (?, ?, ?)",
                &[
                    SqlParam::from("s1"),
                    SqlParam::from("app-state-sync-key-AAAA"),
                    SqlParam::Text(stored.to_string()),
                ],
            )
            .await
            .unwrap();

        let got = keys.get::<AppStateSyncKeyData>(&["AAAA"]).await.unwrap();
        let key = &got["AAAA"];
        assert_eq!(key.key_data.as_bytes(), &[1, 2, 3]);
        assert_eq!(key.timestamp, 100);
        assert_eq!(key.fingerprint.raw_id, 1);
    }

    #[tokio::test]
    async fn test_clear_through_trait() {
        let (keys, store) = test_keys().await;
        store.write("creds", &json!({"registered": false})).await.unwrap();
        keys.set(SignalDataSet::new().put("1", pre_key(1))).await.unwrap();

        keys.clear().await.unwrap();
        assert!(keys.get::<KeyPair>(&["1"]).await.unwrap().is_empty());
        assert!(store.read_json("creds").await.unwrap().is_some());
    }
}
