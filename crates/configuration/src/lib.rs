//! Configuration loader for the custodex exchange.
//!
//! This crate centralizes runtime settings for the server. It provides sane
//! defaults and supports overrides via an optional `config.toml` file and
//! environment variables prefixed with `CUSTODEX_` (nested fields separated
//! using `__`). For example, `CUSTODEX_WEB__LISTEN_ADDR=0.0.0.0:2306`.

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
/// Top-level settings consumed by the exchange.
pub struct Settings {
    pub db: Db,
    pub web: Web,
    pub channels: Channels,
    pub identity: Identity,
}

#[derive(Debug, Deserialize, Clone)]
/// Durability settings for the settlement ledger.
pub struct Db {
    /// Path of the ledger journal file. Empty runs the ledger in memory.
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
/// HTTP endpoint and admission policy.
pub struct Web {
    pub listen_addr: String,
    /// When set, only accounts on the allowed list may submit orders.
    pub permissioned: bool,
    /// Freshness window for signed orders, in seconds.
    pub max_order_age_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
/// Bounded channel capacities for the event pipeline.
pub struct Channels {
    pub inbound: usize,
    pub matches: usize,
    pub transfers: usize,
    pub withdrawals: usize,
}

#[derive(Debug, Deserialize, Clone)]
/// Accounts granted administrative privileges by the static access
/// control implementation.
pub struct Identity {
    pub admins: Vec<String>,
}

impl Settings {
    /// Load settings from defaults, `config.toml` (optional), and environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("db.path", "custodex.journal")?
            .set_default("web.listen_addr", "127.0.0.1:2306")?
            .set_default("web.permissioned", false)?
            .set_default("web.max_order_age_secs", 2)?
            .set_default("channels.inbound", 1024)?
            .set_default("channels.matches", 1024)?
            .set_default("channels.transfers", 1024)?
            .set_default("channels.withdrawals", 256)?
            .set_default("identity.admins", Vec::<String>::new())?
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("CUSTODEX")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// In-memory settings for tests: ephemeral ledger, unroutable listen
    /// address, small channels.
    pub fn ephemeral() -> Self {
        Self {
            db: Db { path: String::new() },
            web: Web {
                listen_addr: "127.0.0.1:0".into(),
                permissioned: false,
                max_order_age_secs: 2,
            },
            channels: Channels {
                inbound: 64,
                matches: 64,
                transfers: 64,
                withdrawals: 16,
            },
            identity: Identity { admins: Vec::new() },
        }
    }
}
