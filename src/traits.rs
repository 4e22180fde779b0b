use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// LatencyStrategy: one way of measuring round-trip time to a host.
#[async_trait]
pub trait LatencyStrategy: Sync + Send {
    /// Short label used in console narration (e.g. "ping", "TCP handshake")
    fn name(&self) -> &'static str;

    /// Average round-trip time in milliseconds over `samples` probes.
    async fn measure(&self, host: &str, samples: u32) -> Result<f64>;
}

/// TransferStrategy: one HTTP client able to report achieved throughput.
#[async_trait]
pub trait TransferStrategy: Sync + Send {
    fn name(&self) -> &'static str;

    /// Download `url` and return the achieved rate in Mbps.
    async fn download(&self, url: &str, timeout: Duration) -> Result<f64>;

    /// Post `payload` as a multipart form field to `url`, returning Mbps.
    ///
    /// Tools that cannot upload keep the default, which reports an error.
    async fn upload(&self, url: &str, payload: &Path, timeout: Duration) -> Result<f64> {
        let _ = (url, payload, timeout);
        Err(crate::error::ProbeError::Custom(format!(
            "{} does not support uploads",
            self.name()
        )))
    }
}
