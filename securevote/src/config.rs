use crate::*;
use std::env::var;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_MASTER_KEY: &str = "SECUREVOTE_MASTER_KEY";
pub const ENV_LEDGER_PATH: &str = "SECUREVOTE_LEDGER_PATH";
pub const ENV_AUDIT_PATH: &str = "SECUREVOTE_AUDIT_PATH";
pub const ENV_ELECTIONS_PATH: &str = "SECUREVOTE_ELECTIONS_PATH";
pub const ENV_LEDGER_TIMEOUT_MS: &str = "SECUREVOTE_LEDGER_TIMEOUT_MS";

pub struct Config {
    pub master_key: Vec<u8>,
    pub ledger_path: PathBuf,
    pub audit_path: PathBuf,
    pub elections_path: PathBuf,
    pub ledger_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Config::from_lookup(|key| var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, Error> {
        let master_key = match lookup(ENV_MASTER_KEY) {
            Some(val) => hex::decode(val.trim())
                .map_err(|e| Error::Config(format!("{} is not valid hex: {}", ENV_MASTER_KEY, e)))?,
            None => {
                return Err(Error::Config(format!(
                    "{} environment variable must be set",
                    ENV_MASTER_KEY
                )))
            }
        };
        if master_key.len() < MASTER_KEY_LENGTH {
            return Err(KeyError::MasterKeyTooShort(MASTER_KEY_LENGTH).into());
        }

        let ledger_path = match lookup(ENV_LEDGER_PATH) {
            Some(val) => PathBuf::from(val),
            None => PathBuf::from("./securevote-ledger.jsonl"),
        };

        let audit_path = match lookup(ENV_AUDIT_PATH) {
            Some(val) => PathBuf::from(val),
            None => PathBuf::from("./securevote-audit.jsonl"),
        };

        let elections_path = match lookup(ENV_ELECTIONS_PATH) {
            Some(val) => PathBuf::from(val),
            None => PathBuf::from("./elections.json"),
        };

        let ledger_timeout = match lookup(ENV_LEDGER_TIMEOUT_MS) {
            Some(val) => val.trim().parse().map(Duration::from_millis).map_err(|e| {
                Error::Config(format!("{} must be a number of milliseconds: {}", ENV_LEDGER_TIMEOUT_MS, e))
            })?,
            None => Duration::from_millis(5000),
        };

        Ok(Config {
            master_key,
            ledger_path,
            audit_path,
            elections_path,
            ledger_timeout,
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("ledger_path", &self.ledger_path)
            .field("audit_path", &self.audit_path)
            .field("elections_path", &self.elections_path)
            .field("ledger_timeout", &self.ledger_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let key = hex::encode([1u8; 32]);
        let config = config(&[(ENV_MASTER_KEY, &key)]).unwrap();
        assert_eq!(config.master_key, vec![1u8; 32]);
        assert_eq!(config.ledger_path, PathBuf::from("./securevote-ledger.jsonl"));
        assert_eq!(config.audit_path, PathBuf::from("./securevote-audit.jsonl"));
        assert_eq!(config.elections_path, PathBuf::from("./elections.json"));
        assert_eq!(config.ledger_timeout, Duration::from_secs(5));
        assert!(!format!("{:?}", config).contains(&key));
    }

    #[test]
    fn test_overrides() {
        let key = hex::encode([2u8; 48]);
        let config = config(&[
            (ENV_MASTER_KEY, &key),
            (ENV_LEDGER_PATH, "/var/lib/securevote/ledger.jsonl"),
            (ENV_LEDGER_TIMEOUT_MS, "250"),
        ])
        .unwrap();
        assert_eq!(config.master_key.len(), 48);
        assert_eq!(config.ledger_path, PathBuf::from("/var/lib/securevote/ledger.jsonl"));
        assert_eq!(config.ledger_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(config(&[]), Err(Error::Config(_))));
        assert!(matches!(config(&[(ENV_MASTER_KEY, "zz")]), Err(Error::Config(_))));
        assert!(matches!(
            config(&[(ENV_MASTER_KEY, "abcd")]),
            Err(Error::Key(KeyError::MasterKeyTooShort(_)))
        ));

        let key = hex::encode([1u8; 32]);
        assert!(matches!(
            config(&[(ENV_MASTER_KEY, &key), (ENV_LEDGER_TIMEOUT_MS, "soon")]),
            Err(Error::Config(_))
        ));
    }
}
