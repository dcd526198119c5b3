//! Session-scoped key/value store
//!
//! Every row of the auth table is `(session, id, value)`. A [`KeyedStore`] is
//! bound to one session and one table; its ids are plain strings such as
//! `creds` or `pre-key-5`. Values are stored as JSON text with binary leaves
//! tagged (see [`crate::codec`]).
//!
//! Writes are last-writer-wins upserts. There is no read-modify-write locking
//! or multi-row transaction: two processes updating the same id concurrently
//! will race, and the later write replaces the earlier one.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::codec;
use crate::config::{MAX_SESSION_LEN, StoreConfig, validate_table_name};
use crate::db::{AuthPool, Dialect, QueryExecutor, Row, SqlParam};
use crate::error::{AuthStateError, Result};

/// Id of the credentials record within a session.
pub const CREDS_ID: &str = "creds";

#[derive(Debug, Clone)]
struct Statements {
    select: String,
    upsert: String,
    delete: String,
    clear_except_creds: String,
    remove_all: String,
}

impl Statements {
    fn new(dialect: Dialect, table: &str) -> Self {
        let t = dialect.quote(table);
        let upsert = match dialect {
            Dialect::MySql => format!(
                "INSERT INTO {t} (session, id, value) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE value = ?"
            ),
            Dialect::Sqlite => format!(
                "INSERT INTO {t} (session, id, value) VALUES (?, ?, ?) \
                 ON CONFLICT(session, id) DO UPDATE SET value = excluded.value"
            ),
        };
        Self {
            select: format!("SELECT value FROM {t} WHERE id = ? AND session = ?"),
            upsert,
            delete: format!("DELETE FROM {t} WHERE id = ? AND session = ?"),
            clear_except_creds: format!(
                "DELETE FROM {t} WHERE id != '{CREDS_ID}' AND session = ?"
            ),
            remove_all: format!("DELETE FROM {t} WHERE session = ?"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyedStore {
    executor: QueryExecutor,
    session: String,
    table: String,
    dialect: Dialect,
    statements: Statements,
}

impl KeyedStore {
    pub fn new(
        executor: QueryExecutor,
        session: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self> {
        let session = session.into();
        let table = table.into();
        if session.is_empty() || session.chars().count() > MAX_SESSION_LEN {
            return Err(AuthStateError::InvalidConfig(format!(
                "session identifier must be 1 to {} characters",
                MAX_SESSION_LEN
            )));
        }
        validate_table_name(&table)?;

        let dialect = executor.dialect();
        Ok(Self {
            statements: Statements::new(dialect, &table),
            executor,
            session,
            table,
            dialect,
        })
    }

    /// Store for `config.session` on `pool`, with the configured retry policy.
    pub fn from_config(pool: Arc<AuthPool>, config: &StoreConfig) -> Result<Self> {
        let executor = QueryExecutor::from_config(pool, config);
        Self::new(executor, config.session.clone(), config.table_name.clone())
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Stored JSON for `id`, with binary tags still in place.
    ///
    /// Missing rows and NULL values (SQL or JSON) read as `None`, as does empty
    /// SQLite text. Malformed stored text is an error.
    pub async fn read_json(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let rows = self
            .executor
            .query(
                &self.statements.select,
                &[SqlParam::from(id), SqlParam::from(self.session.as_str())],
            )
            .await?;

        let Some(value) = rows.into_iter().next().and_then(|mut row| row.remove("value")) else {
            return Ok(None);
        };
        let node = match (self.dialect, value) {
            // MySQL `json` columns arrive already parsed.
            (Dialect::MySql, node) => node,
            // SQLite keeps the document as text.
            (Dialect::Sqlite, serde_json::Value::String(text)) if text.is_empty() => {
                return Ok(None);
            }
            (Dialect::Sqlite, serde_json::Value::String(text)) => codec::decode(&text)?,
            (Dialect::Sqlite, node) => node,
        };
        Ok((!node.is_null()).then_some(node))
    }

    /// Typed value for `id`.
    pub async fn read<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        match self.read_json(id).await? {
            Some(node) => codec::decode_json(node).map(Some),
            None => Ok(None),
        }
    }

    /// Insert or replace the value for `id`.
    pub async fn write<T: Serialize + ?Sized>(&self, id: &str, value: &T) -> Result<()> {
        self.write_acknowledged(id, value).await.map(|_| ())
    }

    /// [`write`](Self::write) that returns `false` when every attempt failed
    /// and the failure was absorbed instead of raised.
    pub async fn write_acknowledged<T: Serialize + ?Sized>(
        &self,
        id: &str,
        value: &T,
    ) -> Result<bool> {
        let text = codec::encode(value)?;
        let mut params = vec![
            SqlParam::from(self.session.as_str()),
            SqlParam::from(id),
            SqlParam::Text(text.clone()),
        ];
        if self.dialect == Dialect::MySql {
            params.push(SqlParam::Text(text));
        }
        if self.executor.execute(&self.statements.upsert, &params).await?.is_none() {
            return Ok(false);
        }
        tracing::debug!("Wrote `{}` for session {}", id, self.session);
        Ok(true)
    }

    /// Delete `id`. Deleting a missing id is not an error.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.executor
            .query(
                &self.statements.delete,
                &[SqlParam::from(id), SqlParam::from(self.session.as_str())],
            )
            .await?;
        Ok(())
    }

    /// Delete every record of this session except the credentials.
    pub async fn clear_except_creds(&self) -> Result<()> {
        self.executor
            .query(
                &self.statements.clear_except_creds,
                &[SqlParam::from(self.session.as_str())],
            )
            .await?;
        tracing::info!("Cleared keys for session {}", self.session);
        Ok(())
    }

    /// Delete every record of this session, credentials included.
    pub async fn remove_all(&self) -> Result<()> {
        self.executor
            .query(&self.statements.remove_all, &[SqlParam::from(self.session.as_str())])
            .await?;
        tracing::info!("Removed all records for session {}", self.session);
        Ok(())
    }

    /// Run arbitrary SQL through the same retry policy.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        self.executor.query(sql, params).await
    }
}
