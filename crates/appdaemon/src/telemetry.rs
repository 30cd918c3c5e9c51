//! Telemetry ingestion over UDP.
//!
//! Managed applications push log lines as datagrams. Every datagram is
//! handled by its own task: it is acknowledged to the sender and, when a
//! forward URL is configured, relayed upstream. Forwarding never delays or
//! suppresses the acknowledgement.

use crate::forward::LogForwarder;
use crate::metrics::MetricsRegistry;
use crate::types::{DaemonConfig, TelemetryMessage};
use chrono::Local;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Pause after a failed receive, doubled per consecutive failure
const RECV_BACKOFF_BASE: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Reply sent for every received datagram.
///
/// The echoed payload is cut at a character boundary so the whole reply
/// fits in one datagram.
pub fn acknowledgement(message: &TelemetryMessage) -> String {
    let received = message.received_at.with_timezone(&Local);
    let head = format!(
        "time received: {}. Your message: ",
        received.format("%a %b %e %H:%M:%S %Y")
    );
    let payload = message.payload_lossy();
    let budget = MAX_DATAGRAM_SIZE.saturating_sub(head.len() + 1);
    let echoed = truncate_at_char_boundary(&payload, budget);

    let mut reply = String::with_capacity(head.len() + echoed.len() + 1);
    reply.push_str(&head);
    reply.push_str(echoed);
    reply.push('!');
    reply
}

fn truncate_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Delay before the next receive after `failures` consecutive errors
fn recv_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    RECV_BACKOFF_BASE
        .saturating_mul(1 << shift)
        .min(RECV_BACKOFF_MAX)
}

/// UDP listener for application telemetry
pub struct LogIngest {
    socket: Arc<UdpSocket>,
    forwarder: Arc<dyn LogForwarder>,
    config: watch::Receiver<Arc<DaemonConfig>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl LogIngest {
    /// Bind the listener socket
    pub async fn bind(
        addr: impl ToSocketAddrs,
        forwarder: Arc<dyn LogForwarder>,
        config: watch::Receiver<Arc<DaemonConfig>>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            forwarder,
            config,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive datagrams until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        match self.socket.local_addr() {
            Ok(addr) => info!(%addr, "Telemetry listener started"),
            Err(_) => info!("Telemetry listener started"),
        }

        let mut failures: u32 = 0;
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, sender) = match received {
                Ok(received) => {
                    failures = 0;
                    received
                }
                Err(e) => {
                    // ICMP errors from earlier replies surface here on some platforms
                    failures = failures.saturating_add(1);
                    let delay = recv_backoff(failures);
                    debug!(error = %e, failures, ?delay, "Failed to receive datagram");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            let message = TelemetryMessage::new(buf[..len].to_vec(), sender);
            if let Some(ref m) = self.metrics {
                m.record_datagram_received();
            }

            let forward = self.config.borrow().forward.clone();
            tokio::spawn(handle_datagram(
                self.socket.clone(),
                self.forwarder.clone(),
                self.metrics.clone(),
                forward,
                message,
            ));
        }

        info!("Telemetry listener stopped");
    }
}

async fn handle_datagram(
    socket: Arc<UdpSocket>,
    forwarder: Arc<dyn LogForwarder>,
    metrics: Option<Arc<MetricsRegistry>>,
    forward: Option<String>,
    message: TelemetryMessage,
) {
    debug!(
        sender = %message.sender,
        bytes = message.payload.len(),
        "Datagram received"
    );

    let reply = acknowledgement(&message);
    match socket.send_to(reply.as_bytes(), message.sender).await {
        Ok(_) => {
            if let Some(ref m) = metrics {
                m.record_datagram_acknowledged();
            }
        }
        Err(e) => warn!(sender = %message.sender, error = %e, "Failed to acknowledge datagram"),
    }

    let Some(target) = forward else {
        return;
    };

    let result = forwarder.forward(&target, &message).await;
    if let Some(ref m) = metrics {
        m.record_datagram_forwarded(result.is_ok());
    }
    if let Err(e) = result {
        warn!(sender = %message.sender, error = %e, "Failed to forward datagram");
    }
}
