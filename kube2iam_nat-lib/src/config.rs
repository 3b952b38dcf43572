use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PATH: &str = "/etc/kube2iam/nat.toml";
pub const ENV_VAR: &str = "KUBE2IAM_NAT_CONFIG_PATH";

const SUPPORTED_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: u8,
    pub redirect: Redirect,
}

/// Parameters of the metadata redirect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Redirect {
    /// Port the metadata proxy listens on.
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    #[serde(default = "default_metadata_address")]
    pub metadata_address: String,
    /// Interface the redirected traffic arrives on, `+` suffix matches a prefix.
    #[serde(default = "default_host_interface")]
    pub host_interface: String,
    /// Address the metadata proxy is bound to.
    pub bind_ip: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration file not found")]
    NoFile,
    #[error("Unable to determine configuration version")]
    VersionNotFound,
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    TomlDeserialization(#[from] toml::de::Error),
    #[error("Unsupported config version: {0}")]
    VersionMismatch(i64),
}

fn default_app_port() -> u16 {
    8181
}

fn default_metadata_address() -> String {
    "169.254.169.254".to_string()
}

fn default_host_interface() -> String {
    "docker0".to_string()
}

/// Configuration path from [`ENV_VAR`], falling back to [`DEFAULT_PATH`].
pub fn path() -> PathBuf {
    std::env::var_os(ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PATH))
}

pub fn read(path: &Path) -> Result<Config, Error> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NoFile
        } else {
            Error::IO(e)
        }
    })?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Config, Error> {
    let table = content.parse::<toml::Table>()?;
    let version = table
        .get("version")
        .and_then(|v| v.as_integer())
        .ok_or(Error::VersionNotFound)?;

    if version != i64::from(SUPPORTED_VERSION) {
        return Err(Error::VersionMismatch(version));
    }

    let res = toml::from_str::<Config>(content)?;
    for key in wrong_keys(&table).iter() {
        tracing::warn!(%key, "ignoring unsupported key in configuration file");
    }
    Ok(res)
}

fn wrong_keys(table: &toml::Table) -> Vec<String> {
    let mut wrong_keys = Vec::new();
    for (key, value) in table.iter() {
        if key == "version" {
            continue;
        }
        if key == "redirect" {
            if let Some(redirect) = value.as_table() {
                for (k, _v) in redirect.iter() {
                    if matches!(
                        k.as_str(),
                        "app_port" | "metadata_address" | "host_interface" | "bind_ip"
                    ) {
                        continue;
                    }
                    wrong_keys.push(format!("redirect.{k}"));
                }
            }
            continue;
        }
        wrong_keys.push(key.to_string());
    }
    wrong_keys
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn test_minimal_config() -> anyhow::Result<()> {
        let config = r#####"
version = 1
[redirect]
bind_ip = "10.0.0.5"
"#####;
        let config = parse(config)?;

        assert_eq!(
            config.redirect,
            Redirect {
                app_port: 8181,
                metadata_address: "169.254.169.254".to_string(),
                host_interface: "docker0".to_string(),
                bind_ip: "10.0.0.5".to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn test_full_config() -> anyhow::Result<()> {
        let config = r#####"
version = 1
[redirect]
app_port = 8080
metadata_address = "169.254.170.2"
host_interface = "cali+"
bind_ip = "127.0.0.1"
"#####;
        let config = parse(config)?;

        assert_eq!(config.redirect.app_port, 8080);
        assert_eq!(config.redirect.metadata_address, "169.254.170.2");
        assert_eq!(config.redirect.host_interface, "cali+");
        assert_eq!(config.redirect.bind_ip, "127.0.0.1");
        Ok(())
    }

    #[test]
    fn missing_bind_ip_is_rejected() {
        let config = r#####"
version = 1
[redirect]
app_port = 8080
"#####;
        assert!(matches!(parse(config), Err(Error::TomlDeserialization(_))));
    }

    #[test]
    fn missing_version_is_rejected() {
        let config = r#####"
[redirect]
bind_ip = "127.0.0.1"
"#####;
        assert!(matches!(parse(config), Err(Error::VersionNotFound)));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let config = r#####"
version = 2
[redirect]
bind_ip = "127.0.0.1"
"#####;
        assert!(matches!(parse(config), Err(Error::VersionMismatch(2))));
    }

    #[test]
    fn out_of_range_version_is_reported_unchanged() {
        let config = r#####"
version = 257
[redirect]
bind_ip = "127.0.0.1"
"#####;
        let res = parse(config);

        assert!(matches!(res, Err(Error::VersionMismatch(257))));
        assert_eq!(
            res.err().map(|e| e.to_string()),
            Some("Unsupported config version: 257".to_string())
        );
    }

    #[test]
    fn unknown_keys_are_reported() -> anyhow::Result<()> {
        let config = r#####"
version = 1
debug = true
[redirect]
bind_ip = "127.0.0.1"
iptables_sync = "10s"
"#####;
        let table = config.parse::<toml::Table>()?;

        let mut keys = wrong_keys(&table);
        keys.sort();
        assert_eq!(keys, vec!["debug".to_string(), "redirect.iptables_sync".to_string()]);
        Ok(())
    }

    #[test]
    fn reads_config_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "version = 1\n[redirect]\nbind_ip = \"192.168.0.10\"")?;

        let config = read(file.path())?;

        assert_eq!(config.version, 1);
        assert_eq!(config.redirect.bind_ip, "192.168.0.10");
        Ok(())
    }

    #[test]
    fn missing_file_is_no_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        let res = read(&dir.path().join("nat.toml"));

        assert!(matches!(res, Err(Error::NoFile)));
        Ok(())
    }

    #[test]
    fn path_honours_env_override() {
        unsafe {
            std::env::set_var(ENV_VAR, "/tmp/kube2iam-nat.toml");
        }
        assert_eq!(path(), PathBuf::from("/tmp/kube2iam-nat.toml"));

        unsafe {
            std::env::remove_var(ENV_VAR);
        }
        assert_eq!(path(), PathBuf::from(DEFAULT_PATH));
    }
}
