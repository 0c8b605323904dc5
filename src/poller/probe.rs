//! ICMP reachability probe distinguishing "offline" from "measurement tool failed".
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use rand::random;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tracing::debug;

use crate::error::ProbeError;

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Ok when the target answered within the probe's timeout.
    async fn check(&self) -> Result<Duration, ProbeError>;
}

/// Sends a single echo request to `host`, bounded by `timeout` including DNS resolution.
pub struct PingProbe {
    host: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }

    fn unreachable(&self, reason: impl ToString) -> ProbeError {
        ProbeError::Unreachable {
            host: self.host.clone(),
            reason: reason.to_string(),
        }
    }

    async fn resolve(&self) -> Result<IpAddr, ProbeError> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let host_with_port = format!("{}:0", self.host);
        let resolved = tokio::task::spawn_blocking(move || {
            host_with_port
                .to_socket_addrs()
                .map(|mut addrs| addrs.next().map(|addr| addr.ip()))
        })
        .await
        .map_err(|e| self.unreachable(format!("resolver task failed: {e}")))?;

        match resolved {
            Ok(Some(ip)) => Ok(ip),
            Ok(None) => Err(self.unreachable("DNS resolution returned no addresses")),
            Err(e) => Err(self.unreachable(format!("DNS resolution failed: {e}"))),
        }
    }

    async fn ping(&self) -> Result<Duration, ProbeError> {
        let target = self.resolve().await?;
        let config = match target {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).map_err(ProbeError::Socket)?;
        let mut pinger = client.pinger(target, PingIdentifier(random())).await;
        pinger.timeout(self.timeout);

        match pinger.ping(PingSequence(0), &[0; 56]).await {
            Ok((_reply, rtt)) => {
                debug!(host = %self.host, %target, rtt_ms = rtt.as_millis() as u64, "Probe reply.");
                Ok(rtt)
            }
            Err(SurgeError::Timeout { .. }) => Err(ProbeError::Timeout {
                host: self.host.clone(),
                timeout: self.timeout,
            }),
            Err(e) => Err(self.unreachable(e)),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn check(&self) -> Result<Duration, ProbeError> {
        match tokio::time::timeout(self.timeout, self.ping()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                host: self.host.clone(),
                timeout: self.timeout,
            }),
        }
    }
}
