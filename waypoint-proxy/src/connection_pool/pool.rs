//! Lock-free hot pool implementation using DashMap and SegQueue.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper::Uri;
use tracing::trace;
use waypoint_core::Scheme;

/// Idle connections kept per backend; extras are closed.
const MAX_IDLE_PER_UPSTREAM: usize = 32;

/// A backend endpoint connections are opened to and reused for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Upstream {
    /// Scheme the backend speaks.
    pub scheme: Scheme,
    /// Backend `host:port`.
    pub address: String,
}

impl Upstream {
    /// Creates an upstream key.
    pub fn new(scheme: Scheme, address: impl Into<String>) -> Self {
        Self {
            scheme,
            address: address.into(),
        }
    }

    /// Reads the upstream from an absolute request URI.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?.parse().ok()?;
        let authority = uri.authority()?;
        Some(Self::new(scheme, authority.as_str()))
    }

    /// The host part of the address, without port or IPv6 brackets.
    pub fn host(&self) -> &str {
        let host = match self.address.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => self.address.as_str(),
        };
        host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address)
    }
}

/// Idle connections unused for this long are closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug)]
struct Idle {
    sender: SendRequest<Incoming>,
    since: Instant,
}

/// A lock-free two-stage hot pool for caching backend HTTP/1.1 connections.
///
/// Entries for a backend are dropped once its queue runs empty, and a sweep
/// run at most once per idle timeout closes connections nobody took back,
/// so deregistered backends do not keep sockets open.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    /// Maps a backend to a lock-free queue of idle HTTP/1.1 senders.
    idle_connections: Arc<DashMap<Upstream, Arc<SegQueue<Idle>>>>,
    idle_timeout: Duration,
    epoch: Instant,
    /// Milliseconds after `epoch` at which the next sweep is due.
    next_sweep: Arc<AtomicU64>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl ConnectionPool {
    /// Creates a new empty connection pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty pool closing connections idle for `idle_timeout`.
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            idle_connections: Arc::new(DashMap::new()),
            idle_timeout,
            epoch: Instant::now(),
            next_sweep: Arc::new(AtomicU64::new(millis(idle_timeout))),
        }
    }

    fn usable(&self, idle: &Idle) -> bool {
        !idle.sender.is_closed() && idle.since.elapsed() < self.idle_timeout
    }

    /// Tries to pop an idle sender to the given backend.
    ///
    /// Closed and expired senders are discarded on the way. The caller still
    /// has to `ready().await` before use.
    pub fn try_pop(&self, upstream: &Upstream) -> Option<SendRequest<Incoming>> {
        let queue = self.idle_connections.get(upstream)?.value().clone();
        let mut found = None;
        while let Some(idle) = queue.pop() {
            if self.usable(&idle) {
                found = Some(idle.sender);
                break;
            }
            trace!("Discarding stale connection to {}", upstream);
        }
        if queue.is_empty() {
            self.idle_connections.remove_if(upstream, |_, queue| queue.is_empty());
        }
        found
    }

    /// Pushes an idle sender back into the pool for reuse.
    pub fn push(&self, upstream: Upstream, sender: SendRequest<Incoming>) {
        if sender.is_closed() {
            return;
        }

        let queue = self
            .idle_connections
            .entry(upstream)
            .or_insert_with(|| Arc::new(SegQueue::new()))
            .value()
            .clone();

        if queue.len() < MAX_IDLE_PER_UPSTREAM {
            queue.push(Idle {
                sender,
                since: Instant::now(),
            });
        }
    }

    /// Returns `sender` to the pool once its in-flight response has been
    /// fully read. Connections that close or are abandoned mid-body are
    /// dropped instead.
    pub fn release(&self, upstream: Upstream, mut sender: SendRequest<Incoming>) {
        let pool = self.clone();
        tokio::spawn(async move {
            if sender.ready().await.is_ok() {
                pool.push(upstream, sender);
            }
            pool.sweep_if_due();
        });
    }

    /// Closes every expired or closed idle connection and forgets backends
    /// left without any.
    pub fn sweep(&self) {
        self.idle_connections.retain(|_, queue| {
            for _ in 0..queue.len() {
                if let Some(idle) = queue.pop() {
                    if self.usable(&idle) {
                        queue.push(idle);
                    }
                }
            }
            !queue.is_empty()
        });
    }

    fn sweep_if_due(&self) {
        let now = millis(self.epoch.elapsed());
        let due = self.next_sweep.load(Ordering::Relaxed);
        if now < due {
            return;
        }
        let next = now.saturating_add(millis(self.idle_timeout));
        if self
            .next_sweep
            .compare_exchange(due, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.sweep();
        }
    }

    /// Number of idle connections currently pooled for `upstream`.
    pub fn idle(&self, upstream: &Upstream) -> usize {
        self.idle_connections
            .get(upstream)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
