//! Remote configuration retrieval and merging.
//!
//! The deployed `config.json` carries the telemetry settings for an
//! environment. It is combined with the options the host passes at startup
//! into a [`MergedConfig`], which is what the SDK is constructed with.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::InitError;

/// Well-known relative path of the deployed configuration resource.
pub const CONFIG_PATH: &str = "config.json";

const SDK_SECTION: &str = "applicationinsights";
const INSTRUMENTATION_KEY: &str = "instrumentationKey";
const CONFIG_KEY: &str = "config";

/// Options supplied by the host application when installing the proxy.
///
/// Merged last, so any top-level key set here wins over the remote values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyOptions(Map<String, Value>);

impl ProxyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ProxyOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Parsed `config.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteConfig {
    /// Contents of the `applicationinsights` section, empty when absent.
    pub sdk: Map<String, Value>,
    /// Root-level key kept for environments that predate the section.
    pub legacy_instrumentation_key: Option<Value>,
}

impl RemoteConfig {
    pub fn parse(payload: &[u8]) -> Result<Self, InitError> {
        let root: Value = serde_json::from_slice(payload)
            .map_err(|e| InitError::ConfigParse(e.to_string()))?;

        let Value::Object(mut root) = root else {
            return Err(InitError::ConfigParse(
                "expected a JSON object at the root".to_string(),
            ));
        };

        let sdk = match root.remove(SDK_SECTION) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(section)) => section,
            Some(other) => {
                return Err(InitError::ConfigParse(format!(
                    "'{SDK_SECTION}' must be an object, got {other}"
                )))
            }
        };

        Ok(Self {
            sdk,
            legacy_instrumentation_key: root.remove(INSTRUMENTATION_KEY),
        })
    }

    /// Combines this remote configuration with the host's options.
    ///
    /// The SDK section lands under `config`, seeded with the legacy root key
    /// which the section overrides when it names its own. Host options are
    /// then applied at the top level; they replace `config` only if they
    /// carry a `config` key themselves.
    pub fn merge(self, options: ProxyOptions) -> MergedConfig {
        let mut config = Map::new();
        if let Some(key) = self.legacy_instrumentation_key {
            config.insert(INSTRUMENTATION_KEY.to_string(), key);
        }
        config.extend(self.sdk);

        let mut snippet = Map::new();
        snippet.insert(CONFIG_KEY.to_string(), Value::Object(config));
        snippet.extend(options.into_map());

        MergedConfig(snippet)
    }
}

/// Configuration an SDK is constructed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergedConfig(Map<String, Value>);

impl MergedConfig {
    /// The `config` object, if the merged snippet still has one.
    pub fn config(&self) -> Option<&Map<String, Value>> {
        self.0.get(CONFIG_KEY).and_then(Value::as_object)
    }

    /// Effective value of a setting: host options first, then `config`.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.0
            .get(key)
            .filter(|_| key != CONFIG_KEY)
            .or_else(|| self.config().and_then(|config| config.get(key)))
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.setting(key).and_then(Value::as_str)
    }

    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.setting(key).and_then(Value::as_bool)
    }

    /// `config.instrumentationKey`, when it is a non-blank string.
    pub fn instrumentation_key(&self) -> Option<&str> {
        self.config()
            .and_then(|config| config.get(INSTRUMENTATION_KEY))
            .and_then(Value::as_str)
            .filter(|key| !key.trim().is_empty())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Where the raw `config.json` bytes come from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, InitError>;
}

/// Settings for fetching `config.json` over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Origin the application is served from; `path` is resolved against it.
    pub base_url: String,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_path() -> String {
    CONFIG_PATH.to_string()
}

const fn default_timeout() -> u64 {
    10
}

impl HttpSourceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: default_path(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Fetches `config.json` with a GET request.
#[derive(Debug)]
pub struct HttpConfigSource {
    client: Client,
    url: Url,
}

impl HttpConfigSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, InitError> {
        let base = if config.base_url.ends_with('/') {
            config.base_url
        } else {
            format!("{}/", config.base_url)
        };
        let url = Url::parse(&base)
            .and_then(|base| base.join(&config.path))
            .map_err(|e| InitError::ConfigFetch(format!("invalid config url: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InitError::ConfigFetch(e.to_string()))?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<Vec<u8>, InitError> {
        debug!(url = %self.url, "fetching config");
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| InitError::ConfigFetch(e.to_string()))?;

        let status = response.status();
        debug!(%status, "config response received");
        if !status.is_success() {
            return Err(InitError::ConfigFetch(format!("unexpected status {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| InitError::ConfigFetch(e.to_string()))?;
        Ok(body.to_vec())
    }
}

/// Reads `config.json` from disk, for hosts that ship it next to the binary.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn fetch(&self) -> Result<Vec<u8>, InitError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| InitError::ConfigFetch(format!("{}: {e}", self.path.display())))
    }
}
