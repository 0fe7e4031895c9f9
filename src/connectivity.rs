//! Reachability signals feeding the reconnection logic.

use crate::config::ConfigError;
use std::time::Duration;
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
    time::{
        self,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

pub trait ConnectivityMonitor: Send + 'static {
    /// Next reachability change, or `None` once the source has closed.
    fn next_change(&mut self) -> impl Future<Output = Option<Connectivity>> + Send;
}

/// Connectivity changes pushed by the embedding application.
pub struct ChannelConnectivity {
    recv: mpsc::UnboundedReceiver<Connectivity>,
}

impl ChannelConnectivity {
    pub fn new_with_sender() -> (Self, mpsc::UnboundedSender<Connectivity>) {
        let (send, recv) = mpsc::unbounded_channel();
        (Self { recv }, send)
    }
}

impl ConnectivityMonitor for ChannelConnectivity {
    async fn next_change(&mut self) -> Option<Connectivity> {
        self.recv.recv().await
    }
}

/// For hosts without any reachability signal.
pub struct NeverChanges;

impl ConnectivityMonitor for NeverChanges {
    async fn next_change(&mut self) -> Option<Connectivity> {
        std::future::pending().await
    }
}

/// Periodically opens a TCP connection to the authority and reports when the
/// outcome flips.
#[derive(Clone, Debug)]
pub struct TcpProbe {
    target: String,
    interval: Duration,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            interval,
            timeout,
        }
    }

    /// Probes the host and port of an `http(s)` base URL.
    pub fn from_url(
        url: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|_| ConfigError::Invalid("authority url is not a valid URL"))?;
        let host = parsed
            .host_str()
            .ok_or(ConfigError::Invalid("authority url has no host"))?;
        let port = parsed
            .port_or_known_default()
            .ok_or(ConfigError::Invalid("authority url has no port"))?;
        Ok(Self::new(format!("{host}:{port}"), interval, timeout))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn probe(&self) -> Connectivity {
        match time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => Connectivity::Online,
            Ok(Err(err)) => {
                debug!(target = %self.target, ?err, "probe connection failed");
                Connectivity::Offline
            }
            Err(_) => {
                debug!(target = %self.target, "probe timed out");
                Connectivity::Offline
            }
        }
    }

    /// Runs the probe on its own task. The first observation is only reported
    /// when it is `Offline`; the session starts out assumed online.
    pub fn spawn(self) -> (ChannelConnectivity, JoinHandle<()>) {
        let (monitor, send) = ChannelConnectivity::new_with_sender();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last = Connectivity::Online;
            loop {
                tokio::select! {
                    _ = send.closed() => break,
                    _ = ticker.tick() => {
                        let observed = self.probe().await;
                        if observed != last {
                            info!(target = %self.target, ?observed, "reachability changed");
                            last = observed;
                            if send.send(observed).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        (monitor, handle)
    }
}
