//! The coalescing cache and fetch loop (component E).
//!
//! A single task owns `cache` and `pending`; every other task talks to it
//! only through two message channels (`request`, `completion`), selected
//! over with `tokio::select!`. This is the same trade a mutex would make,
//! made explicit: one authority, no shared-mutable-state races.

use std::sync::Arc;

use compact_str::{CompactString, ToCompactString};
use futures::future::BoxFuture;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::error::{ResolveError, Result};
use crate::registry::{PackageRecord, RegistryClient};

const CHANNEL_CAPACITY: usize = 256;

/// Abstracts the network fetch so the fetch loop can be driven by a stub
/// in tests without going over HTTP (see the coalescing test below).
pub trait Fetch: Send + Sync + 'static {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<PackageRecord>>;
}

impl Fetch for RegistryClient {
    fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<PackageRecord>> {
        Box::pin(self.fetch_package_record(name))
    }
}

/// `Result<T, Arc<ResolveError>>`: the shape a coalesced fetch fans out to
/// every waiter, since only `Clone` values can be multiplexed to more than
/// one receiver.
pub type SharedResult<T> = std::result::Result<T, Arc<ResolveError>>;

struct PendingRequest {
    name: CompactString,
    reply: Option<oneshot::Sender<SharedResult<Arc<PackageRecord>>>>,
}

struct Completion {
    name: CompactString,
    result: SharedResult<Arc<PackageRecord>>,
}

/// Client-facing handle to the fetch loop. Cheap to hold onto; internally
/// it is just a sender into the loop's request channel.
pub struct Cache {
    requests: flume::Sender<PendingRequest>,
}

impl Cache {
    pub fn spawn(fetcher: Arc<dyn Fetch>) -> Self {
        let (request_tx, request_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (completion_tx, completion_rx) = flume::bounded(CHANNEL_CAPACITY);
        tokio::spawn(fetch_loop(fetcher, request_rx, completion_tx, completion_rx));
        Self { requests: request_tx }
    }

    /// The client-facing primitive: enqueue a request and await the single
    /// delivery, whether this call triggers the fetch, coalesces onto one
    /// already in flight, or is served straight from the cache.
    pub async fn package_data(&self, name: &str) -> Result<Arc<PackageRecord>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send_async(PendingRequest {
                name: name.to_compact_string(),
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| fetch_loop_gone(name))?;

        reply_rx
            .await
            .map_err(|_| fetch_loop_gone(name))?
            .map_err(|e| (*e).clone())
    }

    /// Prefetch convenience: warms the cache for every name concurrently.
    /// The fetch loop's coalescing guarantees duplicate names across the
    /// input (or across concurrent callers elsewhere) cost exactly one
    /// network fetch. Returns the first error encountered, if any.
    pub async fn cache_all<I>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = CompactString>,
    {
        let futures = names
            .into_iter()
            .map(|name| async move { self.package_data(&name).await });
        for result in futures::future::join_all(futures).await {
            result?;
        }
        Ok(())
    }
}

fn fetch_loop_gone(name: &str) -> ResolveError {
    ResolveError::Network {
        name: name.to_compact_string(),
        message: "fetch loop is no longer running".to_compact_string(),
    }
}

async fn fetch_loop(
    fetcher: Arc<dyn Fetch>,
    requests: flume::Receiver<PendingRequest>,
    completions_tx: flume::Sender<Completion>,
    completions_rx: flume::Receiver<Completion>,
) {
    let mut cache: FxHashMap<CompactString, Arc<PackageRecord>> = FxHashMap::default();
    let mut pending: FxHashMap<CompactString, Vec<oneshot::Sender<SharedResult<Arc<PackageRecord>>>>> =
        FxHashMap::default();

    loop {
        tokio::select! {
            request = requests.recv_async() => {
                let Ok(request) = request else {
                    tracing::debug!("request channel closed, shutting down fetch loop");
                    break;
                };
                handle_request(&fetcher, &mut cache, &mut pending, &completions_tx, request).await;
            }
            completion = completions_rx.recv_async() => {
                let Ok(completion) = completion else { continue };
                handle_completion(&mut cache, &mut pending, completion);
            }
        }
    }
}

async fn handle_request(
    fetcher: &Arc<dyn Fetch>,
    cache: &mut FxHashMap<CompactString, Arc<PackageRecord>>,
    pending: &mut FxHashMap<CompactString, Vec<oneshot::Sender<SharedResult<Arc<PackageRecord>>>>>,
    completions_tx: &flume::Sender<Completion>,
    request: PendingRequest,
) {
    if let Some(record) = cache.get(&request.name) {
        tracing::debug!(name = %request.name, "cache hit");
        if let Some(reply) = request.reply {
            let _ = reply.send(Ok(record.clone()));
        }
        return;
    }

    if let Some(waiters) = pending.get_mut(&request.name) {
        tracing::debug!(name = %request.name, "coalescing onto in-flight fetch");
        if let Some(reply) = request.reply {
            waiters.push(reply);
        }
        return;
    }

    tracing::debug!(name = %request.name, "starting new fetch");
    let mut waiters = Vec::new();
    if let Some(reply) = request.reply {
        waiters.push(reply);
    }
    pending.insert(request.name.clone(), waiters);

    let fetcher = fetcher.clone();
    let name = request.name;
    let completions_tx = completions_tx.clone();
    tokio::spawn(async move {
        let result = fetcher.fetch(&name).await.map(Arc::new).map_err(Arc::new);
        let _ = completions_tx.send_async(Completion { name, result }).await;
    });
}

fn handle_completion(
    cache: &mut FxHashMap<CompactString, Arc<PackageRecord>>,
    pending: &mut FxHashMap<CompactString, Vec<oneshot::Sender<SharedResult<Arc<PackageRecord>>>>>,
    completion: Completion,
) {
    let waiters = pending.remove(&completion.name).unwrap_or_default();
    if let Ok(record) = &completion.result {
        cache.insert(completion.name.clone(), record.clone());
    } else {
        tracing::warn!(name = %completion.name, "fetch failed, not caching");
    }
    for waiter in waiters {
        let _ = waiter.send(completion.result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use indexmap::IndexMap;

    use crate::version::Version;

    struct CountingStub {
        calls: AtomicUsize,
    }

    impl Fetch for CountingStub {
        fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<PackageRecord>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(PackageRecord {
                    name: name.to_compact_string(),
                    dist_tags: IndexMap::new(),
                    versions: IndexMap::new(),
                    sorted_versions: vec![Version::new(4, 18, 0)],
                })
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_requests_coalesce_to_one_fetch() {
        let stub = Arc::new(CountingStub {
            calls: AtomicUsize::new(0),
        });
        let cache = Cache::spawn(stub.clone());

        let calls: Vec<_> = (0..100)
            .map(|_| {
                let cache = &cache;
                async move { cache.package_data("express").await.unwrap() }
            })
            .collect();
        let results = futures::future::join_all(calls).await;

        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 100);
        let first = Arc::as_ptr(&results[0]);
        assert!(results.iter().all(|r| Arc::as_ptr(r) == first));
    }

    #[tokio::test]
    async fn second_request_after_completion_hits_cache_not_fetch() {
        let stub = Arc::new(CountingStub {
            calls: AtomicUsize::new(0),
        });
        let cache = Cache::spawn(stub.clone());

        cache.package_data("express").await.unwrap();
        cache.package_data("express").await.unwrap();

        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    struct FailingStub;

    impl Fetch for FailingStub {
        fn fetch<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<PackageRecord>> {
            let name = name.to_compact_string();
            Box::pin(async move {
                Err(ResolveError::Response {
                    name,
                    status: 404,
                    reason: "Not Found".to_compact_string(),
                })
            })
        }
    }

    #[tokio::test]
    async fn fetch_failure_is_surfaced_to_waiter_and_not_cached() {
        let cache = Cache::spawn(Arc::new(FailingStub));
        let err = cache.package_data("missing").await.unwrap_err();
        assert!(matches!(err, ResolveError::Response { status: 404, .. }));
    }
}
