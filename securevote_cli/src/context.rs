use crate::fail;
use log::warn;
use securevote::*;
use std::sync::Arc;

pub type Admin = ElectionAdmin<KeyVault, MemRegistry, FileLedger, Box<dyn AuditLog>>;

/// Everything a command needs, built from the environment and the elections file.
pub struct Context {
    pub config: Config,
    pub keys: Arc<KeyVault>,
    pub registry: Arc<MemRegistry>,
}

impl Context {
    pub fn load() -> Self {
        let config = Config::from_env().unwrap_or_else(|e| fail("config", e));

        let bytes = std::fs::read(&config.elections_path).unwrap_or_else(|e| {
            fail(
                "config",
                format!("unable to read {}: {}", config.elections_path.display(), e),
            )
        });
        let elections = ElectionsFile::from_json(&bytes).unwrap_or_else(|e| fail("config", e));

        let keys = KeyVault::from_elections(&config.master_key, &elections)
            .unwrap_or_else(|e| fail("keys", e));

        Context {
            keys: Arc::new(keys),
            registry: Arc::new(elections.registry()),
            config,
        }
    }

    pub fn ledger(&self) -> Arc<FileLedger> {
        let ledger = FileLedger::open(&self.config.ledger_path, self.config.ledger_timeout)
            .unwrap_or_else(|e| fail("ledger", e));
        Arc::new(ledger)
    }

    /// The audit log, or a stand-in that reports why it could not be opened.
    pub fn audit(&self) -> Arc<Box<dyn AuditLog>> {
        let audit: Box<dyn AuditLog> = match FileAuditLog::open(&self.config.audit_path) {
            Ok(audit) => Box::new(audit),
            Err(e) => {
                warn!(
                    "securevote: audit log {} unavailable: {}",
                    self.config.audit_path.display(),
                    e
                );
                Box::new(UnavailableAuditLog::new(e))
            }
        };
        Arc::new(audit)
    }

    pub fn admin(&self) -> Admin {
        ElectionAdmin::new(
            self.keys.clone(),
            self.registry.clone(),
            self.ledger(),
            self.audit(),
        )
    }
}
