//! MySQL-backed authentication state for end-to-end messaging clients
//!
//! Persists the long-lived state of a messaging client (identity keys,
//! pre-keys, session records, app-state sync keys) so it survives restarts.
//! Many independent credential sets can share one table, each under its own
//! session identifier.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mysql_auth_state::auth::{AuthState, KeyPair, RandomCredsFactory, SignalDataSet, SignalKeyStore};
//! use mysql_auth_state::config::StoreConfig;
//! use mysql_auth_state::db::PoolManager;
//!
//! # async fn demo() -> mysql_auth_state::Result<()> {
//! let manager = PoolManager::new();
//! let mut config = StoreConfig::new("my-session");
//! config.password = Some("secret".into());
//!
//! let mut state = AuthState::open(&manager, &config, &RandomCredsFactory).await?;
//! state.keys().set(SignalDataSet::new().put("1", KeyPair::default())).await?;
//! state.creds_mut().next_pre_key_id += 1;
//! state.save_creds().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cli;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use auth::{AuthState, AuthenticationCreds, CredsFactory, KeyCategory, SignalKeyStore};
pub use db::PoolManager;
pub use error::{AuthStateError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
