use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::request::Request;
use crate::response::RawResponse;
use crate::util::lock_unpoisoned;

/// Stable cache key of a request: method, normalized url and query.
///
/// Headers never take part, so re-stamped retry attempts share the key of
/// the original request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub(crate) fn of(request: &Request) -> Self {
        let mut url = request.url().clone();
        url.set_fragment(None);
        if url.query() == Some("") {
            url.set_query(None);
        }
        Self(format!("{} {}", request.method(), url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Key-value store of previously observed successful responses.
///
/// Both operations are called from async code and must not block on I/O.
/// Eviction is up to the implementation.
pub trait ResponseCache: Send + Sync {
    fn get(&self, fingerprint: &Fingerprint) -> Option<RawResponse>;

    fn put(&self, fingerprint: Fingerprint, response: RawResponse);
}

/// Disabled cache: every lookup misses and writes are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl ResponseCache for NoCache {
    fn get(&self, _fingerprint: &Fingerprint) -> Option<RawResponse> {
        None
    }

    fn put(&self, _fingerprint: Fingerprint, _response: RawResponse) {}
}

/// Default byte budget of [`MemoryCache::new`], about 10 MB.
pub const DEFAULT_MEMORY_CACHE_CAPACITY_BYTES: usize = 10_000_000;

/// Bounded in-process cache. Concurrent writers to one fingerprint race
/// with last-write-wins; readers always see a complete entry.
///
/// Entries are weighed by fingerprint, header and body size. When a write
/// pushes the total over the capacity, the oldest entries are evicted first.
/// A single response larger than the whole capacity is not stored.
#[derive(Debug)]
pub struct MemoryCache {
    state: Mutex<MemoryCacheState>,
    capacity_bytes: usize,
}

#[derive(Debug, Default)]
struct MemoryCacheState {
    entries: HashMap<Fingerprint, RawResponse>,
    insertion_order: VecDeque<Fingerprint>,
    size_bytes: usize,
    evictions: u64,
}

impl MemoryCacheState {
    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<RawResponse> {
        let removed = self.entries.remove(fingerprint)?;
        self.size_bytes = self
            .size_bytes
            .saturating_sub(entry_weight(fingerprint, &removed));
        self.insertion_order.retain(|queued| queued != fingerprint);
        Some(removed)
    }

    fn evict_if_needed(&mut self, capacity_bytes: usize, incoming: usize) {
        while self.size_bytes + incoming > capacity_bytes {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.size_bytes = self
                    .size_bytes
                    .saturating_sub(entry_weight(&oldest, &evicted));
                self.evictions += 1;
            }
        }
    }
}

fn entry_weight(fingerprint: &Fingerprint, response: &RawResponse) -> usize {
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len())
        .sum::<usize>();
    fingerprint.as_str().len() + headers + response.body().len()
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity_bytes(DEFAULT_MEMORY_CACHE_CAPACITY_BYTES)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bytes(capacity_bytes: usize) -> Self {
        Self {
            state: Mutex::new(MemoryCacheState::default()),
            capacity_bytes,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn size_bytes(&self) -> usize {
        lock_unpoisoned(&self.state).size_bytes
    }

    pub fn evictions(&self) -> u64 {
        lock_unpoisoned(&self.state).evictions
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        lock_unpoisoned(&self.state).entries.contains_key(fingerprint)
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<RawResponse> {
        lock_unpoisoned(&self.state).remove(fingerprint)
    }

    pub fn clear(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.entries.clear();
        state.insertion_order.clear();
        state.size_bytes = 0;
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, fingerprint: &Fingerprint) -> Option<RawResponse> {
        lock_unpoisoned(&self.state).entries.get(fingerprint).cloned()
    }

    fn put(&self, fingerprint: Fingerprint, response: RawResponse) {
        let weight = entry_weight(&fingerprint, &response);
        let mut state = lock_unpoisoned(&self.state);
        state.remove(&fingerprint);
        if weight > self.capacity_bytes {
            return;
        }
        state.evict_if_needed(self.capacity_bytes, weight);
        state.size_bytes += weight;
        state.insertion_order.push_back(fingerprint.clone());
        state.entries.insert(fingerprint, response);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::header::{HeaderName, HeaderValue};
    use http::{HeaderMap, Method};

    use super::{DEFAULT_MEMORY_CACHE_CAPACITY_BYTES, MemoryCache, NoCache, ResponseCache};
    use crate::request::Request;
    use crate::response::RawResponse;

    fn request(method: Method, url: &str) -> Request {
        Request::builder(method, url)
            .build()
            .expect("request should build")
    }

    #[test]
    fn fingerprint_ignores_headers_and_fragment() {
        let plain = request(Method::GET, "https://Example.com/get#section");
        let stamped = plain.with_header(
            HeaderName::from_static("x-retry-attempt"),
            HeaderValue::from_static("3"),
        );

        assert_eq!(plain.fingerprint(), stamped.fingerprint());
        assert_eq!(plain.fingerprint().as_str(), "GET https://example.com/get");
    }

    #[test]
    fn fingerprint_distinguishes_method_and_query() {
        let get = request(Method::GET, "https://example.com/items?page=1");
        let head = request(Method::HEAD, "https://example.com/items?page=1");
        let other_page = request(Method::GET, "https://example.com/items?page=2");

        assert_ne!(get.fingerprint(), head.fingerprint());
        assert_ne!(get.fingerprint(), other_page.fingerprint());
    }

    #[test]
    fn fingerprint_normalizes_default_port_and_empty_query() {
        let explicit = request(Method::GET, "https://example.com:443/get?");
        let implicit = request(Method::GET, "https://example.com/get");
        assert_eq!(explicit.fingerprint(), implicit.fingerprint());
    }

    #[test]
    fn memory_cache_last_write_wins() {
        let cache = MemoryCache::new();
        let key = request(Method::GET, "https://example.com/get").fingerprint();

        cache.put(key.clone(), RawResponse::new(200, HeaderMap::new(), "first"));
        cache.put(key.clone(), RawResponse::new(200, HeaderMap::new(), "second"));

        assert_eq!(cache.len(), 1);
        let cached = cache.get(&key).expect("entry should exist");
        assert_eq!(cached.text_lossy(), "second");
        assert!(cache.remove(&key).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn no_cache_never_returns_entries() {
        let cache = NoCache;
        let key = request(Method::GET, "https://example.com/get").fingerprint();
        cache.put(key.clone(), RawResponse::new(200, HeaderMap::new(), "ok"));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn memory_cache_survives_concurrent_writers() {
        let cache = Arc::new(MemoryCache::new());
        let handles = (0..8)
            .map(|index| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for round in 0..50 {
                        let key = request(
                            Method::GET,
                            &format!("https://example.com/items/{}", round % 5),
                        )
                        .fingerprint();
                        cache.put(
                            key.clone(),
                            RawResponse::new(200, HeaderMap::new(), format!("writer-{index}")),
                        );
                        let entry = cache.get(&key).expect("entry should be readable");
                        assert!(entry.text_lossy().starts_with("writer-"));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("writer thread should finish");
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn memory_cache_defaults_to_bounded_capacity() {
        let cache = MemoryCache::new();
        assert_eq!(cache.capacity_bytes(), DEFAULT_MEMORY_CACHE_CAPACITY_BYTES);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn memory_cache_stays_within_capacity_under_many_distinct_writes() {
        let cache = MemoryCache::with_capacity_bytes(64 * 1024);
        for index in 0..100_000 {
            let key =
                request(Method::GET, &format!("https://example.com/items/{index}")).fingerprint();
            cache.put(key, RawResponse::new(200, HeaderMap::new(), vec![b'x'; 64]));
        }

        assert!(cache.size_bytes() <= cache.capacity_bytes());
        assert!(cache.len() < 1_000, "cache kept {} entries", cache.len());
        assert!(cache.evictions() > 99_000);

        let newest = request(Method::GET, "https://example.com/items/99999").fingerprint();
        let oldest = request(Method::GET, "https://example.com/items/0").fingerprint();
        assert!(cache.contains(&newest));
        assert!(!cache.contains(&oldest));
    }

    #[test]
    fn memory_cache_evicts_oldest_entry_first() {
        let first = request(Method::GET, "https://example.com/a").fingerprint();
        let second = request(Method::GET, "https://example.com/b").fingerprint();
        let third = request(Method::GET, "https://example.com/c").fingerprint();
        let body = vec![b'x'; 100];
        let one_entry = first.as_str().len() + body.len();
        let cache = MemoryCache::with_capacity_bytes(one_entry * 2);

        cache.put(first.clone(), RawResponse::new(200, HeaderMap::new(), body.clone()));
        cache.put(second.clone(), RawResponse::new(200, HeaderMap::new(), body.clone()));
        cache.put(third.clone(), RawResponse::new(200, HeaderMap::new(), body));

        assert!(!cache.contains(&first));
        assert!(cache.contains(&second));
        assert!(cache.contains(&third));
        assert_eq!(cache.evictions(), 1);
        assert_eq!(cache.size_bytes(), one_entry * 2);
    }

    #[test]
    fn memory_cache_rewrite_replaces_weight_and_skips_oversized_entries() {
        let key = request(Method::GET, "https://example.com/get").fingerprint();
        let cache = MemoryCache::with_capacity_bytes(256);

        cache.put(key.clone(), RawResponse::new(200, HeaderMap::new(), vec![b'a'; 100]));
        cache.put(key.clone(), RawResponse::new(200, HeaderMap::new(), vec![b'b'; 10]));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), key.as_str().len() + 10);

        cache.put(key.clone(), RawResponse::new(200, HeaderMap::new(), vec![b'c'; 1024]));
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }
}
