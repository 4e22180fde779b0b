use crate::config::Settings;
use crate::error::Result;
use crate::probes::latency::LatencyProber;
use crate::probes::transfer::{TransferProber, UploadPayload};
use crate::types::{self, Endpoint, Measurement};
use tracing::{debug, warn};

/// Result of walking the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Success(Measurement),
    AllFailed,
}

/// Server Selector: tries candidates in order and keeps the first one whose
/// latency and download stages both succeed.
pub struct Orchestrator {
    latency: LatencyProber,
    transfer: TransferProber,
}

impl Orchestrator {
    pub fn new(latency: LatencyProber, transfer: TransferProber) -> Self {
        Self { latency, transfer }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let payload = UploadPayload::new(UploadPayload::default_path(), settings.upload_size_mb)?;
        let transfer = if settings.native {
            TransferProber::native(payload, settings.timeout)
        } else {
            TransferProber::with_tools(payload, settings.timeout)
        };

        Ok(Self::new(LatencyProber::new(settings.ping_count), transfer))
    }

    pub async fn run(&self, candidates: &[Endpoint]) -> RunOutcome {
        let started = types::now();

        for candidate in candidates {
            println!("\nTesting with {}...\n", candidate.name);

            if let Some(m) = self.try_candidate(candidate, started).await {
                return RunOutcome::Success(m);
            }
        }

        RunOutcome::AllFailed
    }

    /// One pass over a candidate; `None` means move on to the next one.
    async fn try_candidate(
        &self,
        candidate: &Endpoint,
        started: chrono::NaiveDateTime,
    ) -> Option<Measurement> {
        let ping_ms = match self.latency.measure(&candidate.latency_host).await {
            Ok(ms) => ms,
            Err(e) => {
                debug!(server = %candidate.name, error = %e, "latency stage failed");
                println!("Cannot connect to {}, trying next server...", candidate.name);
                return None;
            }
        };
        let mut result = Measurement::new(started, &candidate.name, ping_ms);

        if let Some(url) = &candidate.download_url {
            match self.transfer.measure_download(url).await {
                Ok(mbps) => result = result.with_download(mbps),
                Err(e) => {
                    debug!(server = %candidate.name, error = %e, "download stage failed");
                    println!(
                        "Download test failed with {}, trying next server...",
                        candidate.name
                    );
                    return None;
                }
            }
        }

        // Upload is best effort: a failure leaves it at zero ("not tested").
        if let Some(url) = &candidate.upload_url {
            match self.transfer.measure_upload(url).await {
                Ok(mbps) => result = result.with_upload(mbps),
                Err(e) => {
                    warn!(server = %candidate.name, error = %e, "upload stage failed");
                    println!("Upload test failed: {}", e);
                }
            }
        }

        Some(result)
    }
}
