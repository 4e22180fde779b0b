use super::first_success;
use crate::error::{ProbeError, Result};
use crate::traits::LatencyStrategy;
use async_trait::async_trait;
use regex::Regex;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

// 单次 TCP 握手的超时，防止不可达主机拖住整个探测
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const HTTPS_PORT: u16 = 443;

/// Extracts the average RTT from a ping summary line.
///
/// Linux prints `rtt min/avg/max/mdev = a/b/c/d ms`, BSD and macOS print
/// `round-trip min/avg/max/stddev = a/b/c/d ms`.
pub fn parse_ping_average(output: &str) -> Result<f64> {
    let re = Regex::new(r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = [\d.]+/([\d.]+)/")?;

    re.captures(output)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Unparsable {
            tool: "ping",
            output: output.trim().to_string(),
        })
}

/// Arithmetic mean, `None` for an empty sample set.
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Strategy A: the system ICMP `ping` utility.
pub struct IcmpPing {
    program: String,
}

impl IcmpPing {
    pub fn new() -> Self {
        Self {
            program: "ping".to_string(),
        }
    }
}

#[async_trait]
impl LatencyStrategy for IcmpPing {
    fn name(&self) -> &'static str {
        "System ping"
    }

    async fn measure(&self, host: &str, samples: u32) -> Result<f64> {
        let output = Command::new(&self.program)
            .args(["-c", &samples.to_string(), "-q", host])
            .output()
            .await
            .map_err(|e| ProbeError::CommandFailed {
                tool: "ping",
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProbeError::CommandFailed {
                tool: "ping",
                reason: format!("exited with {}", output.status),
            });
        }

        parse_ping_average(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Strategy B: time sequential TCP connects, for networks that drop ICMP.
pub struct TcpHandshake {
    port: u16,
    connect_timeout: Duration,
}

impl TcpHandshake {
    pub fn new() -> Self {
        Self {
            port: HTTPS_PORT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// One connect attempt, `None` if it failed or timed out.
    async fn sample(&self, host: &str) -> Option<f64> {
        let start = Instant::now();
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, self.port))).await
        {
            Ok(Ok(_stream)) => Some(start.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => {
                debug!(host, port = self.port, error = %e, "handshake failed");
                None
            }
            Err(_) => {
                debug!(host, port = self.port, "handshake timed out");
                None
            }
        }
    }
}

#[async_trait]
impl LatencyStrategy for TcpHandshake {
    fn name(&self) -> &'static str {
        "TCP handshake"
    }

    async fn measure(&self, host: &str, samples: u32) -> Result<f64> {
        let mut durations = Vec::with_capacity(samples as usize);
        for _ in 0..samples {
            if let Some(ms) = self.sample(host).await {
                durations.push(ms);
            }
        }

        debug!(host, ok = durations.len(), total = samples, "handshake samples");
        mean(&durations).ok_or(ProbeError::NoSuccessfulSamples)
    }
}

/// Latency Prober: ICMP first, TCP handshake timing when that fails.
pub struct LatencyProber {
    strategies: Vec<Box<dyn LatencyStrategy>>,
    samples: u32,
}

impl LatencyProber {
    pub fn new(samples: u32) -> Self {
        Self::with_strategies(
            vec![Box::new(IcmpPing::new()), Box::new(TcpHandshake::new())],
            samples,
        )
    }

    pub fn with_strategies(strategies: Vec<Box<dyn LatencyStrategy>>, samples: u32) -> Self {
        Self {
            strategies,
            samples,
        }
    }

    pub async fn measure(&self, host: &str) -> Result<f64> {
        println!("Testing ping to {}...", host);

        let samples = self.samples;
        let (ms, used) = first_success(&self.strategies, |s| s.name(), |s| {
            s.measure(host, samples)
        })
        .await?;

        println!("Ping ({}): {:.2} ms", used, ms);
        Ok(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_linux_summary() {
        let out = "--- 1.1.1.1 ping statistics ---\n\
                   10 packets transmitted, 10 received, 0% packet loss, time 9012ms\n\
                   rtt min/avg/max/mdev = 11.204/14.873/20.991/2.807 ms\n";
        assert_eq!(parse_ping_average(out).unwrap(), 14.873);
    }

    #[test]
    fn test_parse_ignores_other_fields() {
        let a = "rtt min/avg/max/mdev = 1.0/42.5/3.0/4.0 ms";
        let b = "rtt min/avg/max/mdev = 900.1/42.5/1000.7/99.9 ms";
        assert_eq!(parse_ping_average(a).unwrap(), 42.5);
        assert_eq!(parse_ping_average(b).unwrap(), 42.5);
    }

    #[test]
    fn test_parse_bsd_summary() {
        let out = "round-trip min/avg/max/stddev = 9.1/10.25/12.0/0.8 ms";
        assert_eq!(parse_ping_average(out).unwrap(), 10.25);
    }

    #[test]
    fn test_parse_garbage_fails() {
        let err = parse_ping_average("ping: unknown host nowhere").unwrap_err();
        assert!(matches!(err, ProbeError::Unparsable { tool: "ping", .. }));
        assert!(parse_ping_average("").is_err());
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[10.0, 20.0, 30.0]), Some(20.0));
    }

    #[tokio::test]
    async fn test_handshake_against_local_listener() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        tokio::spawn(async move {
            while let Ok((_sock, _)) = listener.accept().await {}
        });

        let ms = TcpHandshake::with_port(port).measure("127.0.0.1", 3).await?;
        assert!(ms >= 0.0);
        assert!(ms < 2000.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_handshake_with_nothing_listening_fails() -> Result<()> {
        // Bind then drop to get a port that refuses connections.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            listener.local_addr()?.port()
        };

        let err = TcpHandshake::with_port(port)
            .measure("127.0.0.1", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::NoSuccessfulSamples));
        Ok(())
    }

    struct Scripted {
        name: &'static str,
        value: Option<f64>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LatencyStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn measure(&self, _host: &str, _samples: u32) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value.ok_or(ProbeError::NoSuccessfulSamples)
        }
    }

    #[tokio::test]
    async fn test_prober_falls_back_once() {
        let icmp_calls = Arc::new(AtomicUsize::new(0));
        let tcp_calls = Arc::new(AtomicUsize::new(0));
        let prober = LatencyProber::with_strategies(
            vec![
                Box::new(Scripted {
                    name: "icmp",
                    value: None,
                    calls: icmp_calls.clone(),
                }),
                Box::new(Scripted {
                    name: "tcp",
                    value: Some(23.5),
                    calls: tcp_calls.clone(),
                }),
            ],
            10,
        );

        assert_eq!(prober.measure("example.net").await.unwrap(), 23.5);
        assert_eq!(icmp_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tcp_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prober_skips_fallback_when_icmp_works() {
        let tcp_calls = Arc::new(AtomicUsize::new(0));
        let prober = LatencyProber::with_strategies(
            vec![
                Box::new(Scripted {
                    name: "icmp",
                    value: Some(8.0),
                    calls: Arc::new(AtomicUsize::new(0)),
                }),
                Box::new(Scripted {
                    name: "tcp",
                    value: Some(99.0),
                    calls: tcp_calls.clone(),
                }),
            ],
            10,
        );

        assert_eq!(prober.measure("example.net").await.unwrap(), 8.0);
        assert_eq!(tcp_calls.load(Ordering::SeqCst), 0);
    }
}
