//! Worker membership: the live/idle sets and the plaintext announcement
//! listener that feeds them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A worker endpoint. Workers carry no identity beyond (host, port); one
/// that restarts on the same endpoint is indistinguishable from the
/// original.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registry for workers.
///
/// Invariant: `idle` is a subset of `live`. All mutation happens under the
/// single mutex this registry is shared through.
#[derive(Debug, Default)]
pub struct Registry {
    live: HashSet<Endpoint>,
    idle: HashSet<Endpoint>,
}

impl Registry {
    /// Add a worker to both sets. Idempotent.
    pub fn register(&mut self, endpoint: Endpoint) {
        self.idle.insert(endpoint.clone());
        self.live.insert(endpoint);
    }

    /// Remove a worker from both sets. Idempotent.
    pub fn unregister(&mut self, endpoint: &Endpoint) {
        self.idle.remove(endpoint);
        self.live.remove(endpoint);
    }

    /// Drain every currently idle worker for assignment.
    pub fn acquire_idle(&mut self) -> Vec<Endpoint> {
        self.idle.drain().collect()
    }

    /// Return a worker to the idle pool. A worker that announced DOWN (or
    /// was dropped after an RPC failure) in the meantime stays gone.
    pub fn release(&mut self, endpoint: &Endpoint) {
        if self.live.contains(endpoint) {
            self.idle.insert(endpoint.clone());
        }
    }

    pub fn live_endpoints(&self) -> Vec<Endpoint> {
        self.live.iter().cloned().collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

/// One parsed membership announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub endpoint: Endpoint,
    pub up: bool,
}

/// Parse one announcement line: `"<host> <port> <UP|DOWN>"`.
pub fn parse_announcement(line: &str) -> Result<Announcement> {
    let mut fields = line.split_whitespace();
    let host = fields
        .next()
        .ok_or_else(|| anyhow!("announcement missing host"))?;
    let port = fields
        .next()
        .ok_or_else(|| anyhow!("announcement missing port"))?
        .parse::<u16>()
        .map_err(|e| anyhow!("bad announcement port: {e}"))?;
    let up = match fields.next() {
        Some("UP") => true,
        Some("DOWN") => false,
        other => bail!("bad announcement direction {other:?}"),
    };
    Ok(Announcement {
        endpoint: Endpoint::new(host, port),
        up,
    })
}

/// Accept announcement connections forever. Each connection delivers one
/// line, fire-and-forget: no acknowledgment is ever sent.
pub async fn serve_announcements(listener: TcpListener, registry: Arc<Mutex<Registry>>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("announcement accept failed: {e}");
                continue;
            }
        };

        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut line = String::new();
            if BufReader::new(stream).read_line(&mut line).await.is_err() {
                warn!("announcement from {peer} died mid-line");
                return;
            }

            match parse_announcement(&line) {
                Ok(Announcement { endpoint, up }) => {
                    let mut registry = registry.lock().await;
                    if up {
                        registry.register(endpoint.clone());
                    } else {
                        registry.unregister(&endpoint);
                    }
                    info!(
                        "announcement {} {}: {} live, {} idle",
                        endpoint,
                        if up { "UP" } else { "DOWN" },
                        registry.live_count(),
                        registry.idle_count()
                    );
                }
                Err(e) => warn!("bad announcement from {peer}: {e}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new("node-1", port)
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = Registry::default();
        registry.register(endpoint(4000));
        registry.register(endpoint(4000));

        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.idle_count(), 1);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let mut registry = Registry::default();
        registry.unregister(&endpoint(4000));

        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.idle_count(), 0);
    }

    #[test]
    fn acquire_drains_idle_but_not_live() {
        let mut registry = Registry::default();
        registry.register(endpoint(4000));
        registry.register(endpoint(4001));

        let acquired = registry.acquire_idle();
        assert_eq!(acquired.len(), 2);
        assert_eq!(registry.idle_count(), 0);
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn release_requires_liveness() {
        let mut registry = Registry::default();
        registry.register(endpoint(4000));
        let acquired = registry.acquire_idle();

        // Worker went DOWN while busy; releasing it must not resurrect it.
        registry.unregister(&endpoint(4000));
        registry.release(&acquired[0]);

        assert_eq!(registry.idle_count(), 0);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn parse_accepts_up_and_down() {
        assert_eq!(
            parse_announcement("node-1 40123 UP\n").unwrap(),
            Announcement {
                endpoint: Endpoint::new("node-1", 40123),
                up: true
            }
        );
        assert_eq!(
            parse_announcement("node-1 40123 DOWN").unwrap(),
            Announcement {
                endpoint: Endpoint::new("node-1", 40123),
                up: false
            }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_announcement("").is_err());
        assert!(parse_announcement("node-1").is_err());
        assert!(parse_announcement("node-1 notaport UP").is_err());
        assert!(parse_announcement("node-1 40123 SIDEWAYS").is_err());
    }
}
