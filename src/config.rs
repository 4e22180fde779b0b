use crate::error::Result;
use crate::types::Endpoint;
use directories::{BaseDirs, ProjectDirs};
use rand::Rng;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

// Include the JSON file at compile time
const ENDPOINTS_JSON: &str = include_str!("../assets/endpoints.json");

// Global cache for parsed endpoints
static ENDPOINTS_CACHE: OnceLock<Vec<Endpoint>> = OnceLock::new();

/// Placeholder in endpoint URLs replaced by a fresh random token on every run.
const RAND_PLACEHOLDER: &str = "{rand}";
const RAND_LEN: usize = 8;

const LOG_FILE_NAME: &str = "speedtest_results.log";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPLOAD_SIZE_MB: u64 = 10;
const DEFAULT_PING_COUNT: u32 = 10;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "linkprobe")
}

/// Retrieve the ordered list of candidate endpoints
/// Strategy:
/// 1. Try to load from User Config (~/.config/linkprobe/endpoints.json)
/// 2. Fallback to built-in assets/endpoints.json
pub fn get_candidates() -> Vec<Endpoint> {
    let endpoints = ENDPOINTS_CACHE.get_or_init(|| {
        if let Some(proj_dirs) = project_dirs() {
            let path = proj_dirs.config_dir().join("endpoints.json");
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(parsed) = parse_endpoints(&content) {
                        println!("Loaded endpoints from local config: {:?}", path);
                        return parsed;
                    }
                }
            }
        }

        parse_endpoints(ENDPOINTS_JSON)
            .expect("Failed to parse assets/endpoints.json. This is a compile-time error.")
    });

    let token = random_token();
    endpoints
        .iter()
        .map(|e| Endpoint {
            download_url: e.download_url.as_deref().map(|u| expand_url(u, &token)),
            upload_url: e.upload_url.as_deref().map(|u| expand_url(u, &token)),
            ..e.clone()
        })
        .collect()
}

/// Parses an endpoint list. Commas in names would split the server column of
/// the result log, so they are replaced with `;`.
pub fn parse_endpoints(content: &str) -> Result<Vec<Endpoint>> {
    let endpoints: Vec<Endpoint> = serde_json::from_str(content)?;
    Ok(endpoints
        .into_iter()
        .map(|mut e| {
            if e.name.contains(',') {
                warn!(name = %e.name, "replacing ',' in endpoint name");
                e.name = e.name.replace(',', ";");
            }
            e
        })
        .collect())
}

pub fn expand_url(url: &str, token: &str) -> String {
    url.replace(RAND_PLACEHOLDER, token)
}

fn random_token() -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    (0..RAND_LEN)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

/// `~/speedtest_results.log`
pub fn default_log_path() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(LOG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(LOG_FILE_NAME))
}

/// One source of settings (config file or command line). Unset keys fall
/// through to the next layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsLayer {
    pub log_file: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub upload_size_mb: Option<u64>,
    pub ping_count: Option<u32>,
    pub native: Option<bool>,
}

impl SettingsLayer {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads `config.toml` from the platform config dir, empty if absent.
    pub fn from_config_file() -> Result<Self> {
        let Some(proj_dirs) = project_dirs() else {
            return Ok(Self::default());
        };

        let path = proj_dirs.config_dir().join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }

        Self::parse(&fs::read_to_string(&path)?)
    }

    /// Values in `self` win over `lower`.
    pub fn over(self, lower: SettingsLayer) -> SettingsLayer {
        SettingsLayer {
            log_file: self.log_file.or(lower.log_file),
            timeout_secs: self.timeout_secs.or(lower.timeout_secs),
            upload_size_mb: self.upload_size_mb.or(lower.upload_size_mb),
            ping_count: self.ping_count.or(lower.ping_count),
            native: self.native.or(lower.native),
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_file: PathBuf,
    pub timeout: Duration,
    pub upload_size_mb: u64,
    pub ping_count: u32,
    pub native: bool,
}

impl From<SettingsLayer> for Settings {
    fn from(layer: SettingsLayer) -> Self {
        Self {
            log_file: layer.log_file.unwrap_or_else(default_log_path),
            timeout: Duration::from_secs(layer.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            upload_size_mb: layer.upload_size_mb.unwrap_or(DEFAULT_UPLOAD_SIZE_MB),
            ping_count: layer.ping_count.unwrap_or(DEFAULT_PING_COUNT).max(1),
            native: layer.native.unwrap_or(false),
        }
    }
}
