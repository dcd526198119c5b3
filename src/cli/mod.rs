//! CLI Module
//!
//! Operator command line for inspecting and maintaining stored auth state.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::{
    AppStateSyncKeyData, AuthState, CategoryValue, KeyCategory, KeyPair, KeyStore, LtHashState,
    RandomCredsFactory, SenderKeyMemory, SenderKeyRecord, SessionRecord, SignalKeyStore,
};
use crate::codec;
use crate::config::Config;
use crate::db::{PoolManager, SqlParam};

/// Inspect and maintain messaging auth state stored in MySQL
#[derive(Parser, Debug)]
#[command(name = "auth-state")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug mode (writes daily log files)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Session identifier (overrides config and AUTH_STATE_SESSION)
    #[arg(short, long, global = true)]
    pub session: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect and create the auth table if missing
    Init,

    /// Show the session's credentials summary
    Creds {
        /// Persist the credentials (initializes new ones if none are stored)
        #[arg(long)]
        save: bool,
    },

    /// Print stored keys of one category
    Get {
        /// session, pre-key, sender-key, app-state-sync-key,
        /// app-state-sync-version or sender-key-memory
        category: KeyCategory,

        /// Key ids within the category
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete every key of the session but keep its credentials
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Delete everything stored for the session, credentials included
    RemoveCreds {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Run a raw SQL statement with positional parameters
    Query {
        sql: String,

        /// Parameters: integers and floats by shape, `null`, anything else as text
        params: Vec<String>,
    },

    /// Show the effective configuration (secrets masked)
    Config {
        /// Write the effective configuration to a TOML file
        #[arg(long)]
        write: Option<PathBuf>,
    },

    /// Log file maintenance
    Logs {
        #[command(subcommand)]
        operation: LogCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum LogCommands {
    /// Show the most recent log file
    Status,
    /// Remove log files older than the given age
    Clean {
        /// Maximum age in days
        #[arg(short = 'a', long, default_value = "7")]
        days: u64,
    },
}

/// Load configuration and apply command-line overrides.
pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config.as_deref() {
        Some(path) => {
            tracing::info!("Loading configuration from custom path: {}", path);
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };
    if let Some(session) = &cli.session {
        config.store.session = session.clone();
    }
    Ok(config)
}

/// Main CLI entry point
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Config { write } => cmd_config(&config, write),
        Commands::Logs { operation } => cmd_logs(operation),
        command => {
            config.validate()?;
            let manager = PoolManager::new();
            match command {
                Commands::Init => cmd_init(&manager, &config).await,
                Commands::Creds { save } => cmd_creds(&manager, &config, save).await,
                Commands::Get { category, ids } => cmd_get(&manager, &config, category, &ids).await,
                Commands::Clear { force } => cmd_clear(&manager, &config, force, false).await,
                Commands::RemoveCreds { force } => cmd_clear(&manager, &config, force, true).await,
                Commands::Query { sql, params } => cmd_query(&manager, &config, &sql, &params).await,
                Commands::Config { .. } | Commands::Logs { .. } => Ok(()),
            }
        }
    }
}

async fn open_state(manager: &PoolManager, config: &Config) -> Result<AuthState> {
    AuthState::open(manager, &config.store, &RandomCredsFactory)
        .await
        .with_context(|| format!("Failed to open auth state for session {}", config.store.session))
}

async fn cmd_init(manager: &PoolManager, config: &Config) -> Result<()> {
    let pool = manager
        .acquire(&config.store)
        .await
        .context("Failed to initialize pool")?;
    println!(
        "Table `{}` ready ({:?}, database {})",
        config.store.table_name,
        pool.dialect(),
        config.store.database
    );
    Ok(())
}

async fn cmd_creds(manager: &PoolManager, config: &Config, save: bool) -> Result<()> {
    let mut state = open_state(manager, config).await?;
    let stored = if state.creds_are_new() { "not stored" } else { "stored" };
    let creds = state.creds();

    println!("Session: {} ({})", state.session(), stored);
    println!("Registration id: {}", creds.registration_id);
    println!("Registered: {}", creds.registered);
    match &creds.me {
        Some(me) => println!("Account: {}", me.id),
        None => println!("Account: (not paired)"),
    }
    if let Some(platform) = &creds.platform {
        println!("Platform: {}", platform);
    }
    println!("Next pre-key id: {}", creds.next_pre_key_id);
    println!("First unuploaded pre-key id: {}", creds.first_unuploaded_pre_key_id);
    println!(
        "Identity key: {}",
        STANDARD.encode(creds.signed_identity_key.public.as_bytes())
    );
    println!("Noise key: {}", STANDARD.encode(creds.noise_key.public.as_bytes()));

    if save {
        state.save_creds().await.context("Failed to save credentials")?;
        println!("\nCredentials saved");
    }
    Ok(())
}

async fn cmd_get(
    manager: &PoolManager,
    config: &Config,
    category: KeyCategory,
    ids: &[String],
) -> Result<()> {
    let state = open_state(manager, config).await?;
    let keys = state.keys();
    match category {
        KeyCategory::Session => print_keys::<SessionRecord>(keys, ids).await,
        KeyCategory::PreKey => print_keys::<KeyPair>(keys, ids).await,
        KeyCategory::SenderKey => print_keys::<SenderKeyRecord>(keys, ids).await,
        KeyCategory::AppStateSyncKey => print_keys::<AppStateSyncKeyData>(keys, ids).await,
        KeyCategory::AppStateSyncVersion => print_keys::<LtHashState>(keys, ids).await,
        KeyCategory::SenderKeyMemory => print_keys::<SenderKeyMemory>(keys, ids).await,
    }
}

async fn print_keys<V: CategoryValue>(keys: &KeyStore, ids: &[String]) -> Result<()> {
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let found = keys.get::<V>(&ids).await?;
    for id in ids {
        match found.get(id) {
            Some(value) => println!("{}: {}", V::CATEGORY.item_id(id), codec::encode(value)?),
            None => println!("{}: (absent)", V::CATEGORY.item_id(id)),
        }
    }
    Ok(())
}

async fn cmd_clear(
    manager: &PoolManager,
    config: &Config,
    force: bool,
    include_creds: bool,
) -> Result<()> {
    let session = &config.store.session;
    if include_creds {
        println!("WARNING: This will delete ALL data of session {}, credentials included.", session);
    } else {
        println!("This will delete every key of session {} (credentials are kept).", session);
    }

    if !force {
        use std::io::{self, Write};
        print!("Type 'yes' to confirm deletion: ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if input.trim().to_lowercase() != "yes" {
            println!("Cancelled - no data was deleted");
            return Ok(());
        }
    }

    let state = open_state(manager, config).await?;
    if include_creds {
        state.remove_creds().await?;
        println!("Removed all data of session {}", session);
    } else {
        state.clear().await?;
        println!("Cleared keys of session {}", session);
    }
    Ok(())
}

async fn cmd_query(
    manager: &PoolManager,
    config: &Config,
    sql: &str,
    params: &[String],
) -> Result<()> {
    let state = open_state(manager, config).await?;
    let params: Vec<SqlParam> = params.iter().map(|p| SqlParam::parse_arg(p)).collect();
    let rows = state.query(sql, &params).await?;
    if rows.is_empty() {
        println!("(no rows)");
    }
    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

fn cmd_config(config: &Config, write: Option<PathBuf>) -> Result<()> {
    if let Some(path) = write {
        config.save(&path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let shown = toml::to_string_pretty(&config.redacted()).context("Failed to render config")?;
    println!("{}", shown);
    Ok(())
}

fn cmd_logs(operation: LogCommands) -> Result<()> {
    use crate::logging;

    match operation {
        LogCommands::Status => {
            println!("Log directory: {}", logging::default_log_dir().display());
            match logging::get_log_path() {
                Some(path) => println!("Latest log: {}", path.display()),
                None => println!("No log files yet (run with --debug to create one)"),
            }
        }
        LogCommands::Clean { days } => {
            let removed = logging::cleanup_old_logs(days)?;
            println!("Removed {} log file(s) older than {} day(s)", removed, days);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get() {
        let cli = Cli::parse_from(["auth-state", "--session", "s1", "get", "pre-key", "1", "2"]);
        assert_eq!(cli.session.as_deref(), Some("s1"));
        match cli.command {
            Commands::Get { category, ids } => {
                assert_eq!(category, KeyCategory::PreKey);
                assert_eq!(ids, vec!["1", "2"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_category() {
        assert!(Cli::try_parse_from(["auth-state", "get", "identity", "1"]).is_err());
        assert!(Cli::try_parse_from(["auth-state", "get", "pre-key"]).is_err());
    }

    #[test]
    fn test_parse_remove_creds() {
        let cli = Cli::parse_from(["auth-state", "-d", "remove-creds", "--force"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::RemoveCreds { force: true }));
    }

    #[tokio::test]
    async fn test_query_against_sqlite() {
        let mut config = Config::default();
        config.store = crate::config::StoreConfig::sqlite(":memory:", "s1");
        let manager = PoolManager::new();

        cmd_init(&manager, &config).await.unwrap();
        cmd_creds(&manager, &config, true).await.unwrap();
        let state = open_state(&manager, &config).await.unwrap();
        assert!(!state.creds_are_new());

        cmd_query(
            &manager,
            &config,
            "SELECT id FROM auth WHERE session = ?",
            &["s1".to_string()],
        )
        .await
        .unwrap();
        cmd_clear(&manager, &config, true, true).await.unwrap();
        assert!(open_state(&manager, &config).await.unwrap().creds_are_new());
    }
}
