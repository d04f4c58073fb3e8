//! Fetcher configuration model, defaults, and TOML loading.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::providers::ProviderName;

const CONFIG_DIR_NAME: &str = "coverconsensus";
const CONFIG_FILE_NAME: &str = "config.toml";
const MIN_TARGET_MAX_BYTES: usize = 1024;
const MIN_TIMEOUT_MS: u64 = 500;
const MAX_TIMEOUT_MS: u64 = 60_000;

/// Root configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FetcherConfig {
    #[serde(default)]
    /// Candidate budget, fan-out and clustering.
    pub fetch: FetchConfig,
    #[serde(default)]
    /// Timeouts and transfer limits for provider requests.
    pub http: HttpConfig,
    #[serde(default)]
    /// Byte budget for validated images.
    pub image: ImageConfig,
    #[serde(default)]
    /// Provider priority and credentials.
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How provider calls are scheduled within one fetch.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FanOutMode {
    /// One thread per provider; results are merged in priority order.
    #[default]
    Parallel,
    /// Providers run one after another with a courtesy delay in between.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default)]
    pub fan_out: FanOutMode,
    #[serde(default = "default_courtesy_delay_ms")]
    pub courtesy_delay_ms: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ImageConfig {
    /// Validated images larger than this are recompressed to JPEG.
    #[serde(default = "default_target_max_bytes")]
    pub target_max_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ProvidersConfig {
    /// Providers to query, highest priority first. Arrival order follows this list.
    #[serde(default = "default_provider_order")]
    pub order: Vec<ProviderName>,
    /// Last.fm is skipped when no key is configured.
    #[serde(default)]
    pub lastfm_api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            fan_out: FanOutMode::default(),
            courtesy_delay_ms: default_courtesy_delay_ms(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_download_bytes: default_max_download_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            target_max_bytes: default_target_max_bytes(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: default_provider_order(),
            lastfm_api_key: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_max_candidates() -> usize {
    12
}

fn default_courtesy_delay_ms() -> u64 {
    500
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    7_000
}

fn default_max_download_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_user_agent() -> String {
    format!(
        "coverconsensus/{} (cover art lookup; https://github.com/coverconsensus/coverconsensus)",
        env!("CARGO_PKG_VERSION")
    )
}

pub fn default_target_max_bytes() -> usize {
    500_000
}

fn default_provider_order() -> Vec<ProviderName> {
    vec![
        ProviderName::LastFm,
        ProviderName::MusicBrainz,
        ProviderName::ITunes,
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Clamps values into ranges the fetcher can work with.
pub fn sanitize_config(config: FetcherConfig) -> FetcherConfig {
    let threshold = if config.fetch.similarity_threshold.is_finite() {
        config.fetch.similarity_threshold.clamp(0.0, 1.0)
    } else {
        default_similarity_threshold()
    };

    let mut order = Vec::with_capacity(config.providers.order.len());
    for name in config.providers.order {
        if !order.contains(&name) {
            order.push(name);
        }
    }
    if order.is_empty() {
        order = default_provider_order();
    }

    let lastfm_api_key = config
        .providers
        .lastfm_api_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());

    let user_agent = if config.http.user_agent.trim().is_empty() {
        default_user_agent()
    } else {
        config.http.user_agent.trim().to_string()
    };

    FetcherConfig {
        fetch: FetchConfig {
            max_candidates: config.fetch.max_candidates.max(1),
            fan_out: config.fetch.fan_out,
            courtesy_delay_ms: config.fetch.courtesy_delay_ms.min(10_000),
            similarity_threshold: threshold,
        },
        http: HttpConfig {
            connect_timeout_ms: config
                .http
                .connect_timeout_ms
                .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS),
            read_timeout_ms: config
                .http
                .read_timeout_ms
                .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS),
            max_download_bytes: config.http.max_download_bytes.max(MIN_TARGET_MAX_BYTES),
            user_agent,
        },
        image: ImageConfig {
            target_max_bytes: config.image.target_max_bytes.max(MIN_TARGET_MAX_BYTES),
        },
        providers: ProvidersConfig {
            order,
            lastfm_api_key,
        },
        logging: config.logging,
    }
}

/// `<config dir>/coverconsensus/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Reads and sanitizes `path`. A missing or malformed file yields the defaults.
pub fn load_config(path: &Path) -> FetcherConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            info!(
                "Config file not readable, using defaults. path={} error={}",
                path.display(),
                error
            );
            return sanitize_config(FetcherConfig::default());
        }
    };

    match toml::from_str::<FetcherConfig>(&content) {
        Ok(config) => sanitize_config(config),
        Err(error) => {
            warn!(
                "Config file could not be parsed, using defaults. path={} error={}",
                path.display(),
                error
            );
            sanitize_config(FetcherConfig::default())
        }
    }
}
