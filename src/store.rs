use crate::error::Result;
use crate::types::{LogRecord, Measurement, MetricStats, StatsSnapshot};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

pub const HEADER: &str = "Timestamp,Server,Ping (ms),Download (Mbps),Upload (Mbps)";

/// What `load_all` found on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreState {
    /// No log file at the path.
    Missing,
    /// File is empty or holds only the header.
    Empty,
    /// Data lines exist but none of them parse.
    NoValid,
    Records(Vec<LogRecord>),
}

/// Append-only CSV log of completed runs.
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<timestamp>,<server>,<ping>,<download>,<upload>` with two decimals.
    pub fn encode(m: &Measurement) -> String {
        format!(
            "{},{},{:.2},{:.2},{:.2}",
            m.timestamp_string(),
            m.server,
            m.ping_ms,
            m.download_mbps,
            m.upload_mbps
        )
    }

    /// Parses one data line; `None` for anything malformed.
    pub fn parse_line(line: &str) -> Option<LogRecord> {
        let parts: Vec<&str> = line.trim().split(',').collect();
        if parts.len() < 5 {
            return None;
        }

        Some(LogRecord {
            timestamp: parts[0].to_string(),
            server: parts[1].to_string(),
            ping_ms: parts[2].trim().parse().ok()?,
            download_mbps: parts[3].trim().parse().ok()?,
            upload_mbps: parts[4].trim().parse().ok()?,
        })
    }

    /// Appends one line, writing the header first if the file is new or empty.
    pub async fn append(&self, m: &Measurement) -> Result<()> {
        let needs_header = fs::metadata(&self.path)
            .await
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut buf = String::new();
        if needs_header {
            buf.push_str(HEADER);
            buf.push('\n');
        }
        buf.push_str(&Self::encode(m));
        buf.push('\n');

        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Reads every record, skipping the header and any line that fails to parse.
    pub async fn load_all(&self) -> Result<StoreState> {
        if !fs::try_exists(&self.path).await? {
            return Ok(StoreState::Missing);
        }

        // Decoded line by line so invalid UTF-8 only costs the line it is on.
        let bytes = fs::read(&self.path).await?;
        let lines: Vec<&[u8]> = bytes
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .collect();
        if lines.len() <= 1 {
            return Ok(StoreState::Empty);
        }

        let records: Vec<LogRecord> = lines[1..]
            .iter()
            .filter_map(|line| std::str::from_utf8(line).ok())
            .filter_map(Self::parse_line)
            .collect();

        if records.is_empty() {
            Ok(StoreState::NoValid)
        } else {
            Ok(StoreState::Records(records))
        }
    }
}

fn metric_stats(values: &[f64]) -> Option<MetricStats> {
    let last = *values.last()?;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(MetricStats {
        last,
        min,
        max,
        mean,
    })
}

/// Builds the Statistics Snapshot, `None` when there are no records.
///
/// Zero upload values mean "not tested" and stay out of the upload
/// min/max/mean; `last` is still the most recent record's value.
pub fn summarize(records: &[LogRecord]) -> Option<StatsSnapshot> {
    let first = records.first()?;
    let last = records.last()?;

    let pings: Vec<f64> = records.iter().map(|r| r.ping_ms).collect();
    let downloads: Vec<f64> = records.iter().map(|r| r.download_mbps).collect();
    let uploads: Vec<f64> = records
        .iter()
        .map(|r| r.upload_mbps)
        .filter(|v| *v > 0.0)
        .collect();

    Some(StatsSnapshot {
        ping: metric_stats(&pings)?,
        download: metric_stats(&downloads)?,
        upload: metric_stats(&uploads).map(|s| MetricStats {
            last: last.upload_mbps,
            ..s
        }),
        total: records.len(),
        first_timestamp: first.timestamp.clone(),
        last_timestamp: last.timestamp.clone(),
    })
}
