//! HTTP connection pool with global and per-host caps and a TTL'd DNS cache.
//!
//! reqwest owns the sockets; this layer adds admission: a connection slot
//! must be held for the duration of a request, bounded globally by `limit`
//! and per host by `limit_per_host`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::{self, HeaderMap, HeaderValue};
use rustc_hash::FxHashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::SessionConfig;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolved addresses per host, valid for `ttl` after resolution.
#[derive(Debug)]
pub struct DnsCache {
    ttl: Duration,
    entries: Mutex<FxHashMap<String, CachedAddrs>>,
}

#[derive(Debug, Clone)]
struct CachedAddrs {
    addrs: Vec<SocketAddr>,
    resolved_at: Instant,
}

impl DnsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Fresh entry for `host`, evicting it if expired.
    pub fn get(&self, host: &str, now: Instant) -> Option<Vec<SocketAddr>> {
        let mut entries = self.entries.lock().expect("dns cache poisoned");
        let entry = entries.get(host)?;
        if now.saturating_duration_since(entry.resolved_at) < self.ttl {
            return Some(entry.addrs.clone());
        }
        entries.remove(host);
        None
    }

    pub fn insert(&self, host: &str, addrs: Vec<SocketAddr>, now: Instant) {
        self.entries.lock().expect("dns cache poisoned").insert(
            host.to_string(),
            CachedAddrs {
                addrs,
                resolved_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("dns cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// reqwest resolver backed by [`DnsCache`]; misses go to the system resolver.
#[derive(Debug, Clone)]
pub struct CachingResolver {
    cache: Arc<DnsCache>,
}

impl CachingResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(DnsCache::new(ttl)),
        }
    }

    pub fn cache(&self) -> &DnsCache {
        &self.cache
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let cache = self.cache.clone();
        let host = name.as_str().to_string();
        Box::pin(async move {
            if let Some(addrs) = cache.get(&host, Instant::now()) {
                log::trace!("dns cache hit: {host}");
                let addrs: Addrs = Box::new(addrs.into_iter());
                return Ok(addrs);
            }
            let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .collect();
            log::debug!("resolved {host}: {} addresses", resolved.len());
            cache.insert(&host, resolved.clone(), Instant::now());
            let addrs: Addrs = Box::new(resolved.into_iter());
            Ok(addrs)
        })
    }
}

/// Bounded connection pool shared by all fetch tasks.
pub struct ConnectionPool {
    client: reqwest::Client,
    global: Arc<Semaphore>,
    per_host: Mutex<FxHashMap<String, Arc<Semaphore>>>,
    limit_per_host: usize,
    force_close: bool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("available", &self.global.available_permits())
            .field("limit_per_host", &self.limit_per_host)
            .field("force_close", &self.force_close)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Build the pool and its HTTP client.
    ///
    /// `headers` are sent with every request; `timeout` bounds each request
    /// end to end.
    pub fn new(
        session: &SessionConfig,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let idle_per_host = if session.force_close {
            0
        } else {
            session.limit_per_host
        };
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .pool_max_idle_per_host(idle_per_host);
        if session.ttl_dns_cache > 0 {
            builder = builder.dns_resolver(Arc::new(CachingResolver::new(Duration::from_secs(
                session.ttl_dns_cache,
            ))));
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            global: Arc::new(Semaphore::new(session.limit)),
            per_host: Mutex::new(FxHashMap::default()),
            limit_per_host: session.limit_per_host,
            force_close: session.force_close,
        })
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut per_host = self.per_host.lock().expect("pool table poisoned");
        per_host
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.limit_per_host)))
            .clone()
    }

    /// Wait for a free slot under both caps.
    ///
    /// The host slot is taken first so callers queued on a saturated host do
    /// not pin global slots other hosts could use.
    pub async fn acquire_connection(&self, host: &str) -> Connection<'_> {
        let host_slot = self
            .host_semaphore(host)
            .acquire_owned()
            .await
            .expect("pool semaphores are never closed");
        let global_slot = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphores are never closed");
        Connection {
            client: &self.client,
            force_close: self.force_close,
            _global: global_slot,
            _host: host_slot,
        }
    }

    /// Free global slots right now.
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }
}

/// A held connection slot. Dropping it releases both caps.
pub struct Connection<'a> {
    client: &'a reqwest::Client,
    force_close: bool,
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Connection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("force_close", &self.force_close)
            .finish_non_exhaustive()
    }
}

impl Connection<'_> {
    /// GET `url`; the response body must be consumed before the slot drops.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self.client.get(url);
        if self.force_close {
            request = request.header(header::CONNECTION, HeaderValue::from_static("close"));
        }
        request.send().await
    }
}
