//! Database layer
//!
//! Connection pooling, schema creation and the retrying statement executor.
//! Everything above this module speaks in SQL text, positional
//! [`SqlParam`]s and JSON-shaped [`Row`]s, so MySQL and SQLite look the same.

mod backend;
mod executor;
mod pool;

pub use backend::QueryBackend;
pub use executor::QueryExecutor;
pub use pool::{AuthPool, PoolManager};

/// One result row, column name to value.
///
/// Text and numbers map to their JSON counterparts, JSON columns stay
/// structured, and binary columns become binary tags (see [`crate::codec`]).
pub type Row = serde_json::Map<String, serde_json::Value>;

/// SQL flavour spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    /// Quote an identifier that already passed `validate_table_name`.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident),
            Self::Sqlite => format!("\"{}\"", ident),
        }
    }

    /// Idempotent schema statements for the auth table, in execution order.
    ///
    /// Never drops or alters an existing table.
    pub fn create_table(&self, table: &str) -> Vec<String> {
        let quoted = self.quote(table);
        match self {
            Self::MySql => vec![format!(
                "CREATE TABLE IF NOT EXISTS {quoted} (
                    `session` varchar(50) NOT NULL,
                    `id` varchar(80) NOT NULL,
                    `value` json DEFAULT NULL,
                    UNIQUE KEY `idxunique` (`session`, `id`),
                    KEY `idxsession` (`session`),
                    KEY `idxid` (`id`)
                ) ENGINE=InnoDB"
            )],
            Self::Sqlite => vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS {quoted} (
                        session     VARCHAR(50) NOT NULL,
                        id          VARCHAR(80) NOT NULL,
                        value       TEXT DEFAULT NULL,
                        UNIQUE (session, id)
                    )"
                ),
                format!("CREATE INDEX IF NOT EXISTS \"idx_{table}_session\" ON {quoted} (session)"),
                format!("CREATE INDEX IF NOT EXISTS \"idx_{table}_id\" ON {quoted} (id)"),
            ],
        }
    }
}

/// Positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl SqlParam {
    /// Parse a CLI argument: integers and floats by shape, `null` as NULL,
    /// anything else as text.
    pub fn parse_arg(arg: &str) -> Self {
        if arg.eq_ignore_ascii_case("null") {
            Self::Null
        } else if let Ok(n) = arg.parse::<i64>() {
            Self::Int(n)
        } else if let Ok(f) = arg.parse::<f64>()
            && f.is_finite()
        {
            Self::Float(f)
        } else {
            Self::Text(arg.to_string())
        }
    }
}
