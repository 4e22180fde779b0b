use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Timestamp layout used in the result log (`YYYY-MM-DD HH:MM:SS`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 测速候选服务器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub latency_host: String,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub upload_url: Option<String>,
}

impl Endpoint {
    #[cfg(test)]
    pub fn new(
        name: &str,
        latency_host: &str,
        download_url: Option<&str>,
        upload_url: Option<&str>,
    ) -> Self {
        Self {
            name: name.to_string(),
            latency_host: latency_host.to_string(),
            download_url: download_url.map(str::to_string),
            upload_url: upload_url.map(str::to_string),
        }
    }
}

/// Outcome of one measurement run. A zero metric means "not tested".
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub timestamp: NaiveDateTime,
    pub server: String,
    pub ping_ms: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

impl Measurement {
    /// Starts a run for `server` once its latency stage has passed.
    pub fn new(timestamp: NaiveDateTime, server: &str, ping_ms: f64) -> Self {
        Self {
            timestamp,
            server: server.to_string(),
            ping_ms,
            download_mbps: 0.0,
            upload_mbps: 0.0,
        }
    }

    pub fn with_download(self, download_mbps: f64) -> Self {
        Self {
            download_mbps,
            ..self
        }
    }

    pub fn with_upload(self, upload_mbps: f64) -> Self {
        Self {
            upload_mbps,
            ..self
        }
    }

    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Wall-clock start of a run, truncated to whole seconds like the log format.
pub fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// 日志中的一行历史记录
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: String,
    pub server: String,
    pub ping_ms: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

/// min / max / mean / last of one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    pub last: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub ping: MetricStats,
    pub download: MetricStats,
    /// `None` when no record carries an upload value above zero.
    pub upload: Option<MetricStats>,
    pub total: usize,
    pub first_timestamp: String,
    pub last_timestamp: String,
}
