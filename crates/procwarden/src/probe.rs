//! TCP-connect readiness probing

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::trace;

/// Result of a readiness probe that did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Something accepted a connection on the port
    Ready,
    /// The deadline passed without a successful connect
    Timeout,
}

/// Single-target TCP readiness probe
///
/// A probe connects and immediately drops the connection; it never speaks the
/// service's protocol. Connection-refused style errors are retried after
/// `retry_interval` until the deadline passes. Any other error aborts the
/// probe.
#[derive(Debug, Clone)]
pub struct PortProbe {
    host: String,
    port: u16,
    retry_interval: Duration,
}

impl PortProbe {
    /// Create a probe for `host:port` with a 100ms retry interval
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            retry_interval: Duration::from_millis(100),
        }
    }

    /// Set the delay between refused attempts
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Target as `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Probe until the port accepts a connection or `deadline` elapses
    ///
    /// When the deadline fires the in-flight connect is dropped, so no
    /// connection event is observed after `Timeout` is returned.
    pub async fn probe(&self, deadline: Duration) -> io::Result<ProbeOutcome> {
        match timeout(deadline, self.connect_until_ready()).await {
            Ok(Ok(())) => Ok(ProbeOutcome::Ready),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(ProbeOutcome::Timeout),
        }
    }

    async fn connect_until_ready(&self) -> io::Result<()> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => {
                    drop(stream);
                    trace!(addr = %self.addr(), attempts, "Port reachable");
                    return Ok(());
                }
                Err(e) if is_not_listening(&e) => {
                    trace!(addr = %self.addr(), attempts, error = %e, "Port not reachable yet");
                    sleep(self.retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Errors meaning "nothing is accepting on that port yet"
fn is_not_listening(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_probe_ready_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = PortProbe::new("127.0.0.1", port);
        let outcome = probe.probe(Duration::from_millis(500)).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Ready);
    }

    #[tokio::test]
    async fn test_probe_times_out_when_nothing_listens() {
        let port = unused_port().await;
        let probe = PortProbe::new("127.0.0.1", port).retry_interval(Duration::from_millis(10));

        let started = Instant::now();
        let outcome = probe.probe(Duration::from_millis(150)).await.unwrap();

        assert_eq!(outcome, ProbeOutcome::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_probe_retries_until_listener_appears() {
        let port = unused_port().await;

        let binder = tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            // Keep accepting long enough for the probe to connect
            let _ = timeout(Duration::from_secs(2), listener.accept()).await;
        });

        let probe = PortProbe::new("127.0.0.1", port).retry_interval(Duration::from_millis(20));
        let outcome = probe.probe(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Ready);

        binder.await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_fails_fast_on_unreachable_network() {
        let probe = PortProbe::new("224.0.0.1", 9).retry_interval(Duration::from_millis(10));

        let started = Instant::now();
        let result = probe.probe(Duration::from_secs(2)).await;

        assert!(result.is_err(), "expected an error, got {:?}", result);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_not_listening_classification() {
        assert!(is_not_listening(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!is_not_listening(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
