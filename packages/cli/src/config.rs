use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

/// Per-user config file name, relative to the home directory.
pub const CONFIG_FILENAME: &str = ".codegrinderrc";

/// Name of the session cookie expected by the server.
pub const COOKIE_NAME: &str = "codegrinder_session";

/// Persistent per-user configuration: which server to talk to and the
/// opaque session cookie that authenticates us there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub cookie: String,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| CliError::Config("unable to locate home directory".to_string()))?;
        Ok(home.join(CONFIG_FILENAME))
    }

    /// Load the config written by `grind init`.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        let raw = fs::read_to_string(&path).map_err(|_| {
            CliError::Config("unable to load config file; try running 'grind init'".to_string())
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            CliError::Config(format!(
                "failed to parse {}: {err}; you may wish to delete the file and run 'grind init' again",
                path.display()
            ))
        })
    }

    /// Persist the config, writing to a temporary file and renaming it into
    /// place so a crash cannot truncate the previous version.
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        let mut raw = serde_json::to_string_pretty(self)
            .map_err(|err| CliError::Config(format!("error encoding config: {err}")))?;
        raw.push('\n');

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, raw).map_err(|err| CliError::fs(&tmp, err))?;
        fs::rename(&tmp, &path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            CliError::fs(&path, err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let config = Config {
            host: "grinder.example.edu".to_string(),
            cookie: "abc123".to_string(),
        };
        let raw = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.host, config.host);
        assert_eq!(parsed.cookie, config.cookie);
    }

    #[test]
    fn test_wire_field_names() {
        let raw = r#"{"host": "h", "cookie": "c"}"#;
        let parsed: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.host, "h");
        assert_eq!(parsed.cookie, "c");
    }
}
