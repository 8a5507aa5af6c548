// src/config.rs - Engine configuration
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub custody: CustodyConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CustodyConfig {
    /// Monetary value at or above which a non-admin custody transfer needs
    /// administrator sign-off.
    pub approval_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuditConfig {
    /// Materiality threshold as a percentage of system quantity. This is a
    /// fixed business rule, kept here so reports can show it alongside the
    /// data; operations do not read it per call.
    pub discrepancy_threshold_percent: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            custody: CustodyConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:wims.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
            idle_timeout: 600,
        }
    }
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            approval_threshold: 50_000.0,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            discrepancy_threshold_percent: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration: defaults, overlaid by `config.toml` when present,
    /// overlaid by environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = if Path::new("config.toml").exists() {
            let content = fs::read_to_string("config.toml")
                .context("Failed to read config.toml")?;
            toml::from_str(&content).context("Failed to parse config.toml")?
        } else {
            EngineConfig::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.database.max_connections = n;
            }
        }
        if let Ok(v) = env::var("CUSTODY_APPROVAL_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.custody.approval_threshold = n;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("database.url cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be at least 1");
        }
        if self.custody.approval_threshold < 0.0 {
            anyhow::bail!("custody.approval_threshold cannot be negative");
        }
        Ok(())
    }
}
