use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use hass_ws::config::{DEFAULT_CONSUMER_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_PORT};
use hass_ws::{ConnectOptions, SessionSettings};
use serde::{Deserialize, Serialize};

// =============================================================================
// Client config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure, later ones winning:
//
//   config.toml:     host = "homeassistant.local"
//                    access_token = "..."
//
//   env var:         HASS_WS_HOST=homeassistant.local
//                    HASS_WS_CALL_TIMEOUT_SECS=10
//
//   flags:           --host, --port, --token, --secure

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "HASS_WS_";

/// Tunable client configuration, deserialized by figment.
#[derive(Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// 0 = wait for the result or the connection to close.
    #[serde(default)]
    pub call_timeout_secs: u64,
    #[serde(default = "default_consumer_capacity")]
    pub consumer_capacity: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            access_token: None,
            secure: false,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            call_timeout_secs: 0,
            consumer_capacity: default_consumer_capacity(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_secs()
}
fn default_consumer_capacity() -> usize {
    DEFAULT_CONSUMER_CAPACITY
}

/// Values given explicitly on the command line.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub access_token: Option<String>,
    pub secure: bool,
}

impl FileConfig {
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(host) = overrides.host {
            self.host = Some(host);
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(token) = overrides.access_token {
            self.access_token = Some(token);
        }
        self.secure |= overrides.secure;
        self
    }

    pub fn connect_options(&self) -> Result<ConnectOptions> {
        let Some(host) = self.host.clone().filter(|h| !h.trim().is_empty()) else {
            bail!("no hub host configured (set `host` in {CONFIG_FILE}, {ENV_PREFIX}HOST, or --host)");
        };
        let Some(token) = self.access_token.clone().filter(|t| !t.trim().is_empty()) else {
            bail!(
                "no access token configured (set `access_token` in {CONFIG_FILE}, {ENV_PREFIX}ACCESS_TOKEN, or --token)"
            );
        };

        let mut options = ConnectOptions::new(host, token);
        options.port = self.port;
        options.secure = self.secure;
        options.session = SessionSettings {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            call_timeout: (self.call_timeout_secs > 0)
                .then(|| Duration::from_secs(self.call_timeout_secs)),
            consumer_capacity: self.consumer_capacity,
        };
        Ok(options)
    }
}

/// Build a figment that layers: defaults → config.toml → HASS_WS_* env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE)))
        .merge(Env::prefixed(ENV_PREFIX))
}

/// `--config-dir`, or `<platform config dir>/hass-ws`.
pub fn resolve_config_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => dirs::config_dir()
            .map(|dir| dir.join("hass-ws"))
            .context("could not determine the platform config directory"),
    }
}

/// Resolve the final connection options for this invocation.
pub fn resolve(config_dir: &Path, overrides: Overrides) -> Result<ConnectOptions> {
    let file: FileConfig = load_config(config_dir)
        .extract()
        .with_context(|| format!("invalid configuration in {}", config_dir.display()))?;
    file.apply(overrides).connect_options()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let d = FileConfig::default();
        assert!(d.host.is_none());
        assert!(d.access_token.is_none());
        assert_eq!(d.port, 8123);
        assert!(!d.secure);
        assert_eq!(d.handshake_timeout_secs, 3);
        assert_eq!(d.call_timeout_secs, 0);
        assert_eq!(d.consumer_capacity, 64);
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_without_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.port, 8123);
        assert_eq!(fc.consumer_capacity, 64);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "host = \"10.0.0.5\"\nport = 443\nsecure = true\ncall_timeout_secs = 15\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(fc.port, 443);
        assert!(fc.secure);
        assert_eq!(fc.call_timeout_secs, 15);
        // Untouched keys keep their defaults.
        assert_eq!(fc.handshake_timeout_secs, 3);
    }

    #[test]
    fn test_load_config_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "port = \"eighty\"\n").unwrap();
        assert!(load_config(tmp.path()).extract::<FileConfig>().is_err());
    }

    // ── overrides ───────────────────────────────────────────────────────

    #[test]
    fn test_flags_override_file() {
        let file = FileConfig {
            host: Some("from-file".into()),
            access_token: Some("file-token".into()),
            ..Default::default()
        };
        let fc = file.apply(Overrides {
            host: Some("from-flag".into()),
            port: Some(9000),
            access_token: None,
            secure: true,
        });
        assert_eq!(fc.host.as_deref(), Some("from-flag"));
        assert_eq!(fc.port, 9000);
        assert_eq!(fc.access_token.as_deref(), Some("file-token"));
        assert!(fc.secure);
    }

    // ── connect_options ─────────────────────────────────────────────────

    #[test]
    fn test_connect_options() {
        let fc = FileConfig {
            host: Some("hub".into()),
            access_token: Some("T".into()),
            call_timeout_secs: 10,
            handshake_timeout_secs: 5,
            consumer_capacity: 8,
            ..Default::default()
        };
        let opts = fc.connect_options().unwrap();
        assert_eq!(opts.url(), "ws://hub:8123/api/websocket");
        assert_eq!(opts.access_token, "T");
        assert_eq!(opts.session.call_timeout, Some(Duration::from_secs(10)));
        assert_eq!(opts.session.handshake_timeout, Duration::from_secs(5));
        assert_eq!(opts.session.consumer_capacity, 8);
    }

    #[test]
    fn test_zero_call_timeout_means_none() {
        let fc = FileConfig {
            host: Some("hub".into()),
            access_token: Some("T".into()),
            ..Default::default()
        };
        assert!(fc.connect_options().unwrap().session.call_timeout.is_none());
    }

    #[test]
    fn test_missing_host_or_token() {
        let no_host = FileConfig {
            access_token: Some("T".into()),
            ..Default::default()
        };
        let err = no_host.connect_options().unwrap_err().to_string();
        assert!(err.contains("host"));

        let blank_token = FileConfig {
            host: Some("hub".into()),
            access_token: Some("   ".into()),
            ..Default::default()
        };
        let err = blank_token.connect_options().unwrap_err().to_string();
        assert!(err.contains("access token"));
    }

    #[test]
    fn test_resolve_from_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "host = \"hub.lan\"\naccess_token = \"abc\"\n",
        )
        .unwrap();
        let opts = resolve(tmp.path(), Overrides::default()).unwrap();
        assert_eq!(opts.host, "hub.lan");
        assert_eq!(opts.port, 8123);
    }

    #[test]
    fn test_resolve_config_dir_prefers_explicit() {
        let dir = resolve_config_dir(Some(PathBuf::from("/tmp/x"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/x"));
    }
}
