use std::{fs, net::SocketAddr, path::Path, str::FromStr, time::Duration};

use anyhow::Context;
use reqwest::Url;
use serde::Deserialize;

// ------------------------------------------------------------
// Defaults
// ------------------------------------------------------------

const DEFAULT_BASE_URL: &str = "http://localhost:8081";
const DEFAULT_VHOST: &str = "default";
const DEFAULT_APP: &str = "app";
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
const DEFAULT_INTERVAL_SECS: u64 = 10;
const DEFAULT_CONCURRENCY: usize = 4;

// ------------------------------------------------------------
// File layout
// ------------------------------------------------------------
//
// Mirrors `config.yaml`. Every field is optional: a missing
// file, a missing section or a missing key all fall through
// to the environment and then to the built-in defaults.
//
// Example:
//
//   api:
//     base_url: http://ome:8081
//     token: ome-access-token
//     timeout_secs: 5
//   debug: false
//   vhost: default
//   app: app
//   exporter:
//     listen: 0.0.0.0:8000
//     interval_secs: 10
//     concurrency: 4
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FileConfig {
    pub api: FileApi,
    pub debug: Option<bool>,
    pub vhost: Option<String>,
    pub app: Option<String>,
    pub exporter: FileExporter,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FileApi {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FileExporter {
    pub listen: Option<String>,
    pub interval_secs: Option<u64>,
    pub concurrency: Option<usize>,
}

// ------------------------------------------------------------
// Resolved configuration
// ------------------------------------------------------------
//
// The fully merged view the rest of the process works with.
// Precedence per key: environment > file > default.
//
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,

    /// Enables debug logging and full API payload dumps
    pub debug: bool,

    /// Vhost used by probe mode when the upstream lists none
    pub default_vhost: String,

    pub exporter: ExporterConfig,

    /// Overrides that were ignored while loading. Reported by the
    /// caller once logging is up.
    pub warnings: Vec<String>,
}

/// Connection parameters for the OvenMediaEngine REST API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base endpoint, without trailing slash
    pub base_url: Url,

    /// Raw access token (sent as `Basic base64(token)`)
    pub token: Option<String>,

    /// Application name used in every stream path
    pub app: String,

    /// Upper bound for a single request
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Address the `/metrics` endpoint binds to
    pub listen: SocketAddr,

    /// Time between two collection cycles
    pub interval: Duration,

    /// Streams processed in parallel within one cycle
    pub concurrency: usize,
}

impl Config {
    /// Load `path` (if it exists) and apply process environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = if path.exists() {
            let data = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            parse_file(&data)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            FileConfig::default()
        };

        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with an environment lookup.
    ///
    /// The lookup is injected so tests never touch the real
    /// process environment.
    pub fn from_sources<E>(file: FileConfig, env: E) -> anyhow::Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        let base_url = env_value(&env, "API_BASE_URL")
            .or(file.api.base_url)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(base_url.trim().trim_end_matches('/'))
            .with_context(|| format!("invalid API base URL '{base_url}'"))?;

        let token = env_value(&env, "API_TOKEN")
            .or(file.api.token)
            .filter(|v| !v.is_empty());

        let debug = match env_value(&env, "DEBUG") {
            Some(raw) => str_to_bool(&raw),
            None => file.debug.unwrap_or(false),
        };

        let default_vhost = env_value(&env, "VHOST")
            .or(file.vhost)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VHOST.to_string());

        let app = env_value(&env, "APP")
            .or(file.app)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_APP.to_string());

        let timeout_secs = env_parsed(&env, "API_TIMEOUT_SECS", &mut warnings)
            .or(file.api.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let listen = match env_parsed::<SocketAddr, _>(&env, "EXPORTER_LISTEN", &mut warnings) {
            Some(addr) => addr,
            None => file
                .exporter
                .listen
                .as_deref()
                .unwrap_or(DEFAULT_LISTEN)
                .parse()
                .context("invalid exporter.listen address")?,
        };

        let interval_secs = env_parsed(&env, "EXPORTER_INTERVAL_SECS", &mut warnings)
            .or(file.exporter.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);

        let concurrency = env_parsed(&env, "EXPORTER_CONCURRENCY", &mut warnings)
            .or(file.exporter.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);

        Ok(Self {
            api: ApiConfig {
                base_url,
                token,
                app,
                timeout: Duration::from_secs(timeout_secs.max(1)),
            },
            debug,
            default_vhost,
            exporter: ExporterConfig {
                listen,
                interval: Duration::from_secs(interval_secs.max(1)),
                concurrency: concurrency.max(1),
            },
            warnings,
        })
    }
}

pub fn parse_file(data: &str) -> anyhow::Result<FileConfig> {
    // An empty document deserializes to unit, not to a mapping.
    if data.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    Ok(serde_yml::from_str(data)?)
}

fn str_to_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// An environment override. Set-but-empty counts as unset, so the
/// file value still applies.
fn env_value<E>(env: &E, key: &str) -> Option<String>
where
    E: Fn(&str) -> Option<String>,
{
    env(key).filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment override.
///
/// A value that does not parse is recorded in `warnings` and
/// ignored, so the file value or the default still applies.
fn env_parsed<T, E>(env: &E, key: &str, warnings: &mut Vec<String>) -> Option<T>
where
    T: FromStr,
    E: Fn(&str) -> Option<String>,
{
    let raw = env_value(env, key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warnings.push(format!("Ignoring {key}={raw:?}: not a valid value"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let cfg = Config::from_sources(FileConfig::default(), env_from(&[])).unwrap();

        assert_eq!(cfg.api.base_url.as_str(), "http://localhost:8081/");
        assert_eq!(cfg.api.token, None);
        assert_eq!(cfg.api.app, "app");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert!(!cfg.debug);
        assert_eq!(cfg.default_vhost, "default");
        assert_eq!(cfg.exporter.listen, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(cfg.exporter.interval, Duration::from_secs(10));
        assert_eq!(cfg.exporter.concurrency, 4);
    }

    #[test]
    fn file_values_are_used() {
        let file = parse_file(
            "api:\n  base_url: http://ome:9000/\n  token: secret\n  timeout_secs: 2\n\
             debug: true\nvhost: live\napp: stream\n\
             exporter:\n  listen: 127.0.0.1:9100\n  interval_secs: 30\n  concurrency: 8\n",
        )
        .unwrap();
        let cfg = Config::from_sources(file, env_from(&[])).unwrap();

        assert_eq!(cfg.api.base_url.as_str(), "http://ome:9000/");
        assert_eq!(cfg.api.token.as_deref(), Some("secret"));
        assert_eq!(cfg.api.timeout, Duration::from_secs(2));
        assert!(cfg.debug);
        assert_eq!(cfg.default_vhost, "live");
        assert_eq!(cfg.api.app, "stream");
        assert_eq!(cfg.exporter.listen, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(cfg.exporter.interval, Duration::from_secs(30));
        assert_eq!(cfg.exporter.concurrency, 8);
    }

    #[test]
    fn environment_takes_precedence_over_file() {
        let file = parse_file("api:\n  base_url: http://file:1\n  token: file-token\napp: file-app\n")
            .unwrap();
        let env = env_from(&[
            ("API_BASE_URL", "http://env:2"),
            ("API_TOKEN", "env-token"),
            ("APP", "env-app"),
            ("DEBUG", "Yes"),
            ("EXPORTER_INTERVAL_SECS", "3"),
        ]);
        let cfg = Config::from_sources(file, env).unwrap();

        assert_eq!(cfg.api.base_url.host_str(), Some("env"));
        assert_eq!(cfg.api.token.as_deref(), Some("env-token"));
        assert_eq!(cfg.api.app, "env-app");
        assert!(cfg.debug);
        assert_eq!(cfg.exporter.interval, Duration::from_secs(3));
    }

    #[test]
    fn unparsable_env_falls_back_to_file() {
        let file = parse_file("exporter:\n  interval_secs: 20\n").unwrap();
        let env = env_from(&[("EXPORTER_INTERVAL_SECS", "soon"), ("DEBUG", "nope")]);
        let cfg = Config::from_sources(file, env).unwrap();

        assert_eq!(cfg.exporter.interval, Duration::from_secs(20));
        assert!(!cfg.debug);
        assert_eq!(cfg.warnings.len(), 1);
        assert!(cfg.warnings[0].contains("EXPORTER_INTERVAL_SECS"));
    }

    #[test]
    fn empty_env_values_fall_through_to_file() {
        let file = parse_file(
            "api:\n  base_url: http://file:1\n  token: file-token\nvhost: live\napp: file-app\n\
             exporter:\n  interval_secs: 20\n",
        )
        .unwrap();
        let env = env_from(&[
            ("API_BASE_URL", ""),
            ("API_TOKEN", ""),
            ("VHOST", ""),
            ("APP", "  "),
            ("EXPORTER_INTERVAL_SECS", ""),
        ]);
        let cfg = Config::from_sources(file, env).unwrap();

        assert_eq!(cfg.api.base_url.host_str(), Some("file"));
        assert_eq!(cfg.api.token.as_deref(), Some("file-token"));
        assert_eq!(cfg.default_vhost, "live");
        assert_eq!(cfg.api.app, "file-app");
        assert_eq!(cfg.exporter.interval, Duration::from_secs(20));
        assert!(cfg.warnings.is_empty());
    }

    #[test]
    fn empty_token_means_no_credential() {
        let cfg = Config::from_sources(FileConfig::default(), env_from(&[("API_TOKEN", "")]))
            .unwrap();
        assert_eq!(cfg.api.token, None);
    }

    #[test]
    fn shipped_example_matches_defaults() {
        let file = parse_file(include_str!("../config/config.example.yaml")).unwrap();
        let cfg = Config::from_sources(file, env_from(&[])).unwrap();

        assert_eq!(cfg.api.base_url.as_str(), "http://localhost:8081/");
        assert_eq!(cfg.api.token, None);
        assert_eq!(cfg.exporter.listen, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(cfg.exporter.concurrency, 4);
    }

    #[test]
    fn empty_file_is_accepted() {
        let file = parse_file("   \n").unwrap();
        assert!(file.api.base_url.is_none());
    }

    #[test]
    fn invalid_base_url_is_an_error() {
        let env = env_from(&[("API_BASE_URL", "not a url")]);
        assert!(Config::from_sources(FileConfig::default(), env).is_err());
    }
}
