use crate::store::{summarize, StoreState};
use crate::types::{Measurement, MetricStats, StatsSnapshot};
use std::path::Path;

/// Summary block printed after a successful run.
pub fn run_summary(m: &Measurement) -> String {
    let upload = if m.upload_mbps > 0.0 {
        format!("{:.2} Mbps", m.upload_mbps)
    } else {
        "Not tested".to_string()
    };

    format!(
        "=== Speed Test Results ===\n\
         Server: {}\n\
         Timestamp: {}\n\
         Ping: {:.2} ms\n\
         Download: {:.2} Mbps\n\
         Upload: {}\n",
        m.server,
        m.timestamp_string(),
        m.ping_ms,
        m.download_mbps,
        upload
    )
}

fn metric_block(title: &str, s: &MetricStats) -> String {
    format!(
        "\n{}:\n  Last: {:.2}\n  Min: {:.2}\n  Max: {:.2}\n  Avg: {:.2}\n",
        title, s.last, s.min, s.max, s.mean
    )
}

pub fn stats_summary(s: &StatsSnapshot) -> String {
    let mut out = String::from("=== Speed Test Statistics ===\n");
    out.push_str(&metric_block("Ping (ms)", &s.ping));
    out.push_str(&metric_block("Download (Mbps)", &s.download));
    if let Some(upload) = &s.upload {
        out.push_str(&metric_block("Upload (Mbps)", upload));
    }
    out.push_str(&format!(
        "\nTotal tests: {}\nFirst test: {}\nLast test: {}\n",
        s.total, s.first_timestamp, s.last_timestamp
    ));
    out
}

/// Text for `--stats`, covering the missing / empty / unreadable cases.
pub fn render_store_state(path: &Path, state: &StoreState) -> String {
    match state {
        StoreState::Missing => format!("No log file found at {}", path.display()),
        StoreState::Empty => "No test results found in log file".to_string(),
        StoreState::NoValid => "No valid test results found in log file".to_string(),
        StoreState::Records(records) => match summarize(records) {
            Some(snapshot) => stats_summary(&snapshot),
            None => "No valid test results found in log file".to_string(),
        },
    }
}
