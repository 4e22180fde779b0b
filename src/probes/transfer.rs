use super::first_success;
use crate::error::{ProbeError, Result};
use crate::traits::TransferStrategy;
use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const CONNECT_TIMEOUT_SECS: u64 = 5;
const PAYLOAD_FILE_NAME: &str = "speedtest_upload.tmp";
const PAYLOAD_CHUNK: usize = 64 * 1024;

/// Converts a byte rate (as curl reports it) to megabits per second.
pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / 1_000_000.0
}

/// Converts a wget-style `<value> <unit>B/s` rate to megabits per second.
pub fn unit_rate_to_mbps(value: f64, unit: char) -> Option<f64> {
    match unit {
        'K' => Some(value * 8.0 / 1000.0),
        'M' => Some(value * 8.0),
        'G' => Some(value * 8.0 * 1000.0),
        _ => None,
    }
}

/// Pulls the transfer rate out of wget's progress output (stderr).
pub fn parse_wget_rate(output: &str) -> Result<f64> {
    let re = Regex::new(r"(\d+(?:\.\d+)?) ([KMG])B/s")?;

    re.captures(output)
        .and_then(|caps| {
            let value = caps[1].parse::<f64>().ok()?;
            let unit = caps[2].chars().next()?;
            unit_rate_to_mbps(value, unit)
        })
        .ok_or_else(|| ProbeError::Unparsable {
            tool: "wget",
            output: output.lines().last().unwrap_or_default().to_string(),
        })
}

/// Parses curl's `-w %{speed_*}` output, which is bytes per second.
pub fn parse_curl_rate(stdout: &str) -> Result<f64> {
    let trimmed = stdout.trim();
    trimmed
        .parse::<f64>()
        .map(bytes_per_sec_to_mbps)
        .map_err(|_| ProbeError::Unparsable {
            tool: "curl",
            output: trimmed.to_string(),
        })
}

/// Runs an external tool, treating spawn errors and non-zero exits as failures.
async fn run_tool(tool: &'static str, program: &str, args: &[String]) -> Result<Output> {
    debug!(tool, ?args, "spawning");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| ProbeError::CommandFailed {
            tool,
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::CommandFailed {
            tool,
            reason: format!("{} {}", output.status, stderr.trim()),
        });
    }

    Ok(output)
}

/// Primary client: curl reports its own average rate via `-w`.
pub struct CurlTransfer {
    program: String,
}

impl CurlTransfer {
    pub fn new() -> Self {
        Self {
            program: "curl".to_string(),
        }
    }

    fn base_args(timeout: Duration) -> Vec<String> {
        vec![
            "-L".to_string(),
            "-s".to_string(),
            "-o".to_string(),
            "/dev/null".to_string(),
            "--connect-timeout".to_string(),
            CONNECT_TIMEOUT_SECS.to_string(),
            "--max-time".to_string(),
            timeout.as_secs().to_string(),
        ]
    }
}

#[async_trait]
impl TransferStrategy for CurlTransfer {
    fn name(&self) -> &'static str {
        "curl"
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<f64> {
        let mut args = Self::base_args(timeout);
        args.extend(["-w".to_string(), "%{speed_download}".to_string(), url.to_string()]);

        let output = run_tool("curl", &self.program, &args).await?;
        parse_curl_rate(&String::from_utf8_lossy(&output.stdout))
    }

    async fn upload(&self, url: &str, payload: &Path, timeout: Duration) -> Result<f64> {
        let mut args = Self::base_args(timeout);
        args.extend([
            "-X".to_string(),
            "POST".to_string(),
            "-w".to_string(),
            "%{speed_upload}".to_string(),
            "-F".to_string(),
            format!("file=@{}", payload.display()),
            url.to_string(),
        ]);

        let output = run_tool("curl", &self.program, &args).await?;
        parse_curl_rate(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Alternate client: wget, whose human-readable progress has to be scraped.
pub struct WgetTransfer {
    program: String,
}

impl WgetTransfer {
    pub fn new() -> Self {
        Self {
            program: "wget".to_string(),
        }
    }
}

#[async_trait]
impl TransferStrategy for WgetTransfer {
    fn name(&self) -> &'static str {
        "wget"
    }

    async fn download(&self, url: &str, _timeout: Duration) -> Result<f64> {
        let args = vec![
            "-O".to_string(),
            "/dev/null".to_string(),
            format!("--timeout={}", CONNECT_TIMEOUT_SECS),
            "--tries=1".to_string(),
            url.to_string(),
        ];

        let output = run_tool("wget", &self.program, &args).await?;
        parse_wget_rate(&String::from_utf8_lossy(&output.stderr))
    }
}

/// Built-in HTTP client that counts bytes itself, no external tools needed.
pub struct NativeTransfer;

impl NativeTransfer {
    pub fn new() -> Self {
        Self
    }

    fn client(timeout: Duration) -> Result<Client> {
        Ok(Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .build()?)
    }

    fn rate(bytes: u64, elapsed: Duration) -> Result<f64> {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return Err(ProbeError::Custom(
                "Transfer completed too fast to measure".to_string(),
            ));
        }
        Ok(bytes_per_sec_to_mbps(bytes as f64 / secs))
    }
}

#[async_trait]
impl TransferStrategy for NativeTransfer {
    fn name(&self) -> &'static str {
        "built-in client"
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<f64> {
        let client = Self::client(timeout)?;
        let start = Instant::now();

        let response = client.get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            received += chunk?.len() as u64;
        }

        Self::rate(received, start.elapsed())
    }

    async fn upload(&self, url: &str, payload: &Path, timeout: Duration) -> Result<f64> {
        let client = Self::client(timeout)?;
        let file = fs::File::open(payload).await?;
        let size = file.metadata().await?.len();
        let part = Part::stream_with_length(Body::from(file), size).file_name(PAYLOAD_FILE_NAME);
        let form = Form::new().part("file", part);

        let start = Instant::now();
        client
            .post(url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        Self::rate(size, start.elapsed())
    }
}

/// Filler file posted by the upload test.
#[derive(Debug)]
pub struct UploadPayload {
    path: PathBuf,
    size_bytes: u64,
}

impl UploadPayload {
    pub fn new(path: PathBuf, size_mb: u64) -> Result<Self> {
        let size_bytes = size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| ProbeError::Custom(format!("Upload size {} MB is too large", size_mb)))?;
        Ok(Self { path, size_bytes })
    }

    /// `<temp dir>/speedtest_upload.tmp`
    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(PAYLOAD_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_mb(&self) -> u64 {
        self.size_bytes / (1024 * 1024)
    }

    /// Writes the payload unless a file of exactly the right size is already there.
    pub async fn materialize(&self) -> Result<()> {
        if let Ok(meta) = fs::metadata(&self.path).await {
            if meta.is_file() && meta.len() == self.size_bytes {
                debug!(path = %self.path.display(), "reusing upload payload");
                return Ok(());
            }
        }

        let chunk = vec![b'0'; PAYLOAD_CHUNK];
        let mut file = fs::File::create(&self.path).await?;
        let mut remaining = self.size_bytes;
        while remaining > 0 {
            let n = remaining.min(PAYLOAD_CHUNK as u64) as usize;
            file.write_all(&chunk[..n]).await?;
            remaining -= n as u64;
        }
        file.flush().await?;
        Ok(())
    }

    /// Best-effort removal; errors are ignored.
    pub async fn cleanup(&self) {
        let _ = fs::remove_file(&self.path).await;
    }
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Transfer Prober: download with primary/alternate fallback, upload with
/// a single client.
pub struct TransferProber {
    download_strategies: Vec<Box<dyn TransferStrategy>>,
    upload_strategy: Box<dyn TransferStrategy>,
    payload: UploadPayload,
    timeout: Duration,
}

impl TransferProber {
    /// curl first, wget as the alternate; curl alone for uploads.
    pub fn with_tools(payload: UploadPayload, timeout: Duration) -> Self {
        Self::with_strategies(
            vec![Box::new(CurlTransfer::new()), Box::new(WgetTransfer::new())],
            Box::new(CurlTransfer::new()),
            payload,
            timeout,
        )
    }

    /// The built-in client for both directions.
    pub fn native(payload: UploadPayload, timeout: Duration) -> Self {
        Self::with_strategies(
            vec![Box::new(NativeTransfer::new())],
            Box::new(NativeTransfer::new()),
            payload,
            timeout,
        )
    }

    pub fn with_strategies(
        download_strategies: Vec<Box<dyn TransferStrategy>>,
        upload_strategy: Box<dyn TransferStrategy>,
        payload: UploadPayload,
        timeout: Duration,
    ) -> Self {
        Self {
            download_strategies,
            upload_strategy,
            payload,
            timeout,
        }
    }

    pub async fn measure_download(&self, url: &str) -> Result<f64> {
        println!("Testing download speed...");

        let timeout = self.timeout;
        let (mbps, used) = first_success(&self.download_strategies, |s| s.name(), |s| async move {
            let pb = spinner(format!("Downloading with {}", s.name()));
            let res = s.download(url, timeout).await;
            pb.finish_and_clear();
            res
        })
        .await?;

        println!("Download ({}): {:.2} Mbps", used, mbps);
        Ok(mbps)
    }

    pub async fn measure_upload(&self, url: &str) -> Result<f64> {
        println!("Testing upload speed ({} MB)...", self.payload.size_mb());

        let res = match self.payload.materialize().await {
            Ok(()) => {
                let pb = spinner(format!("Uploading with {}", self.upload_strategy.name()));
                let res = self
                    .upload_strategy
                    .upload(url, self.payload.path(), self.timeout)
                    .await;
                pb.finish_and_clear();
                res
            }
            Err(e) => Err(e),
        };
        self.payload.cleanup().await;

        let mbps = res?;
        println!("Upload ({}): {:.2} Mbps", self.upload_strategy.name(), mbps);
        Ok(mbps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_bytes_per_sec_to_mbps() {
        assert_eq!(bytes_per_sec_to_mbps(0.0), 0.0);
        assert_eq!(bytes_per_sec_to_mbps(1_000_000.0), 8.0);
        assert_eq!(bytes_per_sec_to_mbps(12_500_000.0), 100.0);
    }

    #[test]
    fn test_conversion_paths_agree() {
        for r in [0.0, 1.0, 125_000.0, 3_456_789.0, 987_654_321.0] {
            let primary = bytes_per_sec_to_mbps(r);
            let k = unit_rate_to_mbps(r / 1000.0, 'K').unwrap();
            let m = unit_rate_to_mbps(r / 1_000_000.0, 'M').unwrap();
            let g = unit_rate_to_mbps(r / 1_000_000_000.0, 'G').unwrap();
            for other in [k, m, g] {
                assert!((primary - other).abs() < 1e-9, "{} vs {}", primary, other);
            }
        }
    }

    #[test]
    fn test_unknown_unit() {
        assert_eq!(unit_rate_to_mbps(1.0, 'T'), None);
    }

    #[test]
    fn test_parse_wget_rate() {
        let stderr = "Saving to: '/dev/null'\n\n\
                      /dev/null 100%[===================>]  95.37M  11.2MB/s    in 8.6s\n\n\
                      2024-05-01 10:00:00 (11.1 MB/s) - '/dev/null' saved [100000000/100000000]\n";
        assert!((parse_wget_rate(stderr).unwrap() - 88.8).abs() < 1e-9);

        assert_eq!(parse_wget_rate("(512 KB/s) - saved").unwrap(), 4.096);
        assert_eq!(parse_wget_rate("(2 GB/s) - saved").unwrap(), 16000.0);
    }

    #[test]
    fn test_parse_wget_rate_missing() {
        let err = parse_wget_rate("failed: Connection refused.").unwrap_err();
        assert!(matches!(err, ProbeError::Unparsable { tool: "wget", .. }));
    }

    #[test]
    fn test_parse_curl_rate() {
        assert_eq!(parse_curl_rate("1250000.000\n").unwrap(), 10.0);
        assert!(parse_curl_rate("").is_err());
        assert!(parse_curl_rate("abc").is_err());
    }

    #[tokio::test]
    async fn test_payload_created_and_reused() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(PAYLOAD_FILE_NAME);
        let payload = UploadPayload::new(path.clone(), 1)?;

        payload.materialize().await?;
        assert_eq!(fs::metadata(&path).await?.len(), 1024 * 1024);

        // A file of the right size is kept as is.
        fs::write(&path, vec![b'x'; 1024 * 1024]).await?;
        payload.materialize().await?;
        assert_eq!(fs::read(&path).await?[0], b'x');

        // A wrong-sized one is regenerated.
        fs::write(&path, b"short").await?;
        payload.materialize().await?;
        let bytes = fs::read(&path).await?;
        assert_eq!(bytes.len(), 1024 * 1024);
        assert!(bytes.iter().all(|b| *b == b'0'));

        payload.cleanup().await;
        assert!(!path.exists());
        // Cleaning up twice is harmless.
        payload.cleanup().await;
        Ok(())
    }

    #[test]
    fn test_payload_size_overflow_rejected() {
        let err = UploadPayload::new(PathBuf::from("x"), u64::MAX / 1024).unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert_eq!(UploadPayload::new(PathBuf::from("x"), 3).unwrap().size_mb(), 3);
    }

    #[tokio::test]
    async fn test_payload_larger_than_one_chunk() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(PAYLOAD_FILE_NAME);
        let payload = UploadPayload::new(path.clone(), 2)?;

        payload.materialize().await?;
        let bytes = fs::read(&path).await?;
        assert_eq!(bytes.len(), 2 * 1024 * 1024);
        assert!(bytes.iter().all(|b| *b == b'0'));
        Ok(())
    }

    struct Scripted {
        name: &'static str,
        download: Option<f64>,
        upload: Option<f64>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TransferStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn download(&self, _url: &str, _timeout: Duration) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.download
                .ok_or_else(|| ProbeError::Custom(format!("{} down", self.name)))
        }

        async fn upload(&self, _url: &str, payload: &Path, _timeout: Duration) -> Result<f64> {
            assert!(payload.exists());
            self.upload
                .ok_or_else(|| ProbeError::Custom(format!("{} up", self.name)))
        }
    }

    fn scripted(
        name: &'static str,
        download: Option<f64>,
        upload: Option<f64>,
    ) -> Box<dyn TransferStrategy> {
        Box::new(Scripted {
            name,
            download,
            upload,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    #[tokio::test]
    async fn test_download_falls_back_to_alternate() {
        let dir = tempdir().unwrap();
        let prober = TransferProber::with_strategies(
            vec![scripted("primary", None, None), scripted("alternate", Some(42.0), None)],
            scripted("primary", None, None),
            UploadPayload::new(dir.path().join(PAYLOAD_FILE_NAME), 1).unwrap(),
            Duration::from_secs(5),
        );

        assert_eq!(prober.measure_download("http://x").await.unwrap(), 42.0);
    }

    #[tokio::test]
    async fn test_download_both_fail() {
        let dir = tempdir().unwrap();
        let prober = TransferProber::with_strategies(
            vec![scripted("primary", None, None), scripted("alternate", None, None)],
            scripted("primary", None, None),
            UploadPayload::new(dir.path().join(PAYLOAD_FILE_NAME), 1).unwrap(),
            Duration::from_secs(5),
        );

        assert!(prober.measure_download("http://x").await.is_err());
    }

    #[tokio::test]
    async fn test_upload_removes_payload_either_way() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PAYLOAD_FILE_NAME);

        let ok = TransferProber::with_strategies(
            Vec::new(),
            scripted("primary", None, Some(12.5)),
            UploadPayload::new(path.clone(), 1).unwrap(),
            Duration::from_secs(5),
        );
        assert_eq!(ok.measure_upload("http://x").await.unwrap(), 12.5);
        assert!(!path.exists());

        let failing = TransferProber::with_strategies(
            Vec::new(),
            scripted("primary", None, None),
            UploadPayload::new(path.clone(), 1).unwrap(),
            Duration::from_secs(5),
        );
        assert!(failing.measure_upload("http://x").await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_wget_cannot_upload() {
        let err = WgetTransfer::new()
            .upload("http://x", Path::new("/nonexistent"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("wget"));
    }
}
