//! Authentication state
//!
//! [`AuthState`] is what the protocol layer holds on to: the credentials
//! record, a typed key store and the lifecycle operations around them.
//!
//! Credentials are loaded once and cached. Changes made through
//! [`AuthState::creds_mut`] are only persisted by [`AuthState::save_creds`].

mod category;
mod creds;
mod keys;
mod types;

pub use category::{
    CategoryValue, KeyCategory, SenderKeyMemory, SenderKeyRecord, SessionRecord, SignalDataSet,
};
pub use creds::{CredsFactory, RandomCredsFactory, generate_key_pair, generate_registration_id};
pub use keys::{KeyStore, SignalKeyStore};
pub use types::{
    Account, AccountSettings, AppStateSyncKeyData, AuthenticationCreds, Contact,
    DisappearingMode, Fingerprint, KeyPair, LtHashState, ProtocolAddress, RegistrationMethod,
    RegistrationOptions, SignalIdentity, SignedKeyPair, ValueMac,
};

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::db::{AuthPool, PoolManager, Row, SqlParam};
use crate::error::Result;
use crate::store::{CREDS_ID, KeyedStore};

pub struct AuthState {
    creds: AuthenticationCreds,
    creds_are_new: bool,
    keys: KeyStore,
    store: KeyedStore,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("session", &self.store.session())
            .field("table", &self.store.table())
            .field("creds_are_new", &self.creds_are_new)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// Acquire the shared pool from `manager` and load the session's state.
    pub async fn open(
        manager: &PoolManager,
        config: &StoreConfig,
        factory: &dyn CredsFactory,
    ) -> Result<Self> {
        let pool = manager.acquire(config).await?;
        Self::with_pool(pool, config, factory).await
    }

    /// Load the session's state from an already-initialized pool.
    pub async fn with_pool(
        pool: Arc<AuthPool>,
        config: &StoreConfig,
        factory: &dyn CredsFactory,
    ) -> Result<Self> {
        let store = KeyedStore::from_config(pool, config)?;
        let stored = store.read::<AuthenticationCreds>(CREDS_ID).await?;
        let creds_are_new = stored.is_none();
        let creds = match stored {
            Some(creds) => creds,
            None => {
                tracing::info!(
                    "No credentials stored for session {}, initializing new ones",
                    store.session()
                );
                factory.init_creds()
            }
        };

        Ok(Self {
            creds,
            creds_are_new,
            keys: KeyStore::new(store.clone()),
            store,
        })
    }

    pub fn creds(&self) -> &AuthenticationCreds {
        &self.creds
    }

    pub fn creds_mut(&mut self) -> &mut AuthenticationCreds {
        &mut self.creds
    }

    /// True when the credentials came from the factory and no save has been
    /// confirmed since.
    pub fn creds_are_new(&self) -> bool {
        self.creds_are_new
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn session(&self) -> &str {
        self.store.session()
    }

    /// Persist the in-memory credentials.
    ///
    /// `creds_are_new` only flips once the write is confirmed; a write whose
    /// retries ran out under the lenient policy leaves it set.
    pub async fn save_creds(&mut self) -> Result<()> {
        if self.store.write_acknowledged(CREDS_ID, &self.creds).await? {
            self.creds_are_new = false;
        } else {
            tracing::warn!("Credentials of session {} were not saved", self.store.session());
        }
        Ok(())
    }

    /// Drop every key of the session but keep the credentials.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear_except_creds().await
    }

    /// Drop everything stored for the session, credentials included.
    ///
    /// The in-memory credentials stay as they are until the state is dropped.
    pub async fn remove_creds(&self) -> Result<()> {
        self.store.remove_all().await
    }

    /// Raw SQL through the retrying executor.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        self.store.query(sql, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Binary;

    fn memory_config(session: &str) -> StoreConfig {
        StoreConfig::sqlite(":memory:", session)
    }

    async fn open(manager: &PoolManager, session: &str) -> AuthState {
        AuthState::open(manager, &memory_config(session), &RandomCredsFactory)
            .await
            .unwrap()
    }

    async fn count(state: &AuthState) -> usize {
        state
            .query(
                "SELECT id FROM auth WHERE session = ?",
                &[SqlParam::from(state.session())],
            )
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_fresh_session_gets_default_creds() {
        let manager = PoolManager::new();
        let state = open(&manager, "s1").await;
        assert!(state.creds_are_new());
        assert_eq!(state.creds().next_pre_key_id, 1);
        assert_eq!(state.creds().noise_key.public.len(), 32);
        assert_eq!(count(&state).await, 0);
    }

    #[tokio::test]
    async fn test_saved_creds_are_loaded() {
        let manager = PoolManager::new();
        let mut state = open(&manager, "s1").await;
        state.creds_mut().next_pre_key_id = 31;
        state.creds_mut().registered = true;
        state.save_creds().await.unwrap();
        assert!(!state.creds_are_new());

        let reopened = open(&manager, "s1").await;
        assert!(!reopened.creds_are_new());
        assert_eq!(reopened.creds(), state.creds());
    }

    #[tokio::test]
    async fn test_unsaved_changes_are_not_persisted() {
        let manager = PoolManager::new();
        let mut state = open(&manager, "s1").await;
        state.save_creds().await.unwrap();
        state.creds_mut().next_pre_key_id = 99;

        let reopened = open(&manager, "s1").await;
        assert_eq!(reopened.creds().next_pre_key_id, 1);
    }

    /// Reads succeed with no rows; every write fails.
    struct ReadOnlyBackend;

    #[async_trait::async_trait]
    impl crate::db::QueryBackend for ReadOnlyBackend {
        fn dialect(&self) -> crate::db::Dialect {
            crate::db::Dialect::MySql
        }

        async fn run(&self, sql: &str, _params: &[SqlParam]) -> Result<Vec<Row>> {
            if sql.starts_with("INSERT") {
                return Err(crate::error::AuthStateError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(Vec::new())
        }
    }

    async fn read_only_state(fail_on_exhausted: bool) -> AuthState {
        let mut config = memory_config("s1");
        config.max_retries = 2;
        config.retry_request_delay_ms = 10;
        config.fail_on_exhausted_retries = fail_on_exhausted;
        let pool = Arc::new(AuthPool::from_backend(Arc::new(ReadOnlyBackend)));
        AuthState::with_pool(pool, &config, &RandomCredsFactory).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_save_keeps_creds_new() {
        let mut state = read_only_state(false).await;
        assert!(state.creds_are_new());

        state.save_creds().await.unwrap();
        assert!(state.creds_are_new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_is_raised_when_configured() {
        let mut state = read_only_state(true).await;
        let err = state.save_creds().await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::AuthStateError::RetriesExhausted { attempts: 2, .. }
        ));
        assert!(state.creds_are_new());
    }

    #[tokio::test]
    async fn test_clear_and_remove_creds() {
        let manager = PoolManager::new();
        let mut state = open(&manager, "s1").await;
        state.save_creds().await.unwrap();
        state
            .keys()
            .set(
                SignalDataSet::new()
                    .put("1", generate_key_pair())
                    .put("peer.0", SessionRecord(Binary::new(vec![1, 2]))),
            )
            .await
            .unwrap();
        assert_eq!(count(&state).await, 3);

        state.clear().await.unwrap();
        assert_eq!(count(&state).await, 1);
        assert!(!open(&manager, "s1").await.creds_are_new());

        state.remove_creds().await.unwrap();
        assert_eq!(count(&state).await, 0);
        assert!(open(&manager, "s1").await.creds_are_new());
    }

    #[tokio::test]
    async fn test_sessions_share_pool_not_data() {
        let manager = PoolManager::new();
        let s1 = open(&manager, "s1").await;
        let s2 = open(&manager, "s2").await;

        let pair = KeyPair {
            public: Binary::new(vec![1, 2, 3]),
            private: Binary::new(vec![4, 5, 6]),
        };
        s1.keys().set(SignalDataSet::new().put("1", pair.clone())).await.unwrap();

        assert_eq!(s1.keys().get::<KeyPair>(&["1"]).await.unwrap()["1"], pair);
        assert!(s2.keys().get::<KeyPair>(&["1"]).await.unwrap().is_empty());

        s2.clear().await.unwrap();
        assert_eq!(s1.keys().get::<KeyPair>(&["1"]).await.unwrap().len(), 1);
    }
}
