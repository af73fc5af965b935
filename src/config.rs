//! Engine configuration: defaults, `sales-lifecycle.toml`, then
//! `SALES_LIFECYCLE__*` environment variables.
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::stage::InvoiceKind;

pub const CONFIG_FILE: &str = "sales-lifecycle.toml";
pub const ENV_PREFIX: &str = "SALES_LIFECYCLE";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub workflow: WorkflowConfig,
    pub observability: ObservabilityConfig,
    /// Settings every tenant starts from
    pub tenant_defaults: TenantSettings,
    /// Per-tenant overrides, keyed by tenant id
    #[serde(default)]
    pub tenants: HashMap<String, TenantOverride>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DatabaseConfig {
    /// Directory of the sled database
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkflowConfig {
    /// Deadline for one transition's unit of work
    pub transition_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of the human format
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct TenantSettings {
    /// Kind of invoice created when one of the tenant's quotes is accepted
    pub default_invoice_kind: InvoiceKind,
    /// Let OUT movements drive a product's balance below zero
    pub allow_backorder: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TenantOverride {
    pub default_invoice_kind: Option<InvoiceKind>,
    pub allow_backorder: Option<bool>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "data/sales-lifecycle.db".to_string(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
            },
            workflow: WorkflowConfig {
                transition_timeout_ms: 5000,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json: false,
            },
            tenant_defaults: TenantSettings::default(),
            tenants: HashMap::new(),
        }
    }
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            default_invoice_kind: InvoiceKind::Sales,
            allow_backorder: false,
        }
    }
}

impl EngineConfig {
    /// Load with precedence: built-in defaults, `sales-lifecycle.toml` in the
    /// working directory, environment.
    pub fn load() -> Result<Self> {
        let file = Path::new(CONFIG_FILE);
        Self::load_from(file.exists().then_some(file))
    }

    /// Same as [`EngineConfig::load`] with an explicit config file.
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    /// Effective settings for one tenant.
    pub fn tenant(&self, tenant_id: &str) -> TenantSettings {
        let base = self.tenant_defaults;
        match self.tenants.get(tenant_id) {
            Some(over) => TenantSettings {
                default_invoice_kind: over.default_invoice_kind.unwrap_or(base.default_invoice_kind),
                allow_backorder: over.allow_backorder.unwrap_or(base.allow_backorder),
            },
            None => base,
        }
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.workflow.transition_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_overrides_defaults_and_tenants_inherit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[workflow]
transition_timeout_ms = 250

[tenants.globex]
allow_backorder = true

[tenants.initech]
default_invoice_kind = "SERVICE"
"#
        )
        .unwrap();

        let config = EngineConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.transition_timeout(), Duration::from_millis(250));
        assert_eq!(config.server.bind, "127.0.0.1:8080");

        let globex = config.tenant("globex");
        assert!(globex.allow_backorder);
        assert_eq!(globex.default_invoice_kind, InvoiceKind::Sales);

        let initech = config.tenant("initech");
        assert!(!initech.allow_backorder);
        assert_eq!(initech.default_invoice_kind, InvoiceKind::Service);

        assert_eq!(config.tenant("unknown"), TenantSettings::default());
    }
}
