//! Key resolution with a single-flight cache refresh.
//!
//! The resolver keeps the most recent [`KeySet`] behind an `RwLock` so token
//! verification never waits on the network for a known `kid`. A miss
//! triggers one refresh; concurrent misses that observed the same cache
//! epoch share that refresh and its outcome instead of fetching again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use crate::jwks::{KeySet, SigningKey};

/// JWKS responses larger than this are refused.
pub const MAX_JWKS_BYTES: usize = 64 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("key set request timed out")]
    Timeout,

    #[error("key set request failed: {0}")]
    Transport(String),

    #[error("key set endpoint returned status {0}")]
    Status(u16),

    #[error("key set response exceeds {MAX_JWKS_BYTES} bytes")]
    TooLarge,

    #[error("key set response is not a JWKS document: {0}")]
    Decode(String),

    #[error("key set contains no usable signing keys")]
    NoUsableKeys,
}

/// Somewhere a [`KeySet`] can be fetched from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    async fn fetch(&self) -> Result<KeySet, FetchError>;

    /// Human-readable location, for logs and the health endpoint.
    fn describe(&self) -> String;
}

/// Fetches a JWKS document over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySetSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<KeySet, FetchError> {
        let mut response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|len| len > MAX_JWKS_BYTES as u64)
        {
            return Err(FetchError::TooLarge);
        }

        // Content-Length may be absent (chunked), so the cap is enforced
        // while reading as well.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            if body.len() + chunk.len() > MAX_JWKS_BYTES {
                return Err(FetchError::TooLarge);
            }
            body.extend_from_slice(&chunk);
        }

        KeySet::from_document(&body, self.url.clone(), Utc::now())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The key set was refreshed and still has no such `kid`.
    #[error("no signing key with kid '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Source(#[from] FetchError),
}

#[derive(Default)]
struct CacheState {
    keys: Option<Arc<KeySet>>,
    /// Bumped once per completed refresh, successful or not.
    epoch: u64,
    last_failure: Option<FetchError>,
}

/// Shared, process-wide key cache.
pub struct KeyResolver {
    source: Arc<dyn KeySetSource>,
    state: RwLock<CacheState>,
    refresh: tokio::sync::Mutex<()>,
}

impl KeyResolver {
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self {
            source,
            state: RwLock::new(CacheState::default()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    pub fn source(&self) -> String {
        self.source.describe()
    }

    /// Fetch the key set ahead of the first request.
    ///
    /// A failure is logged and otherwise ignored; the first miss retries.
    pub async fn prime(&self) {
        let epoch = self.state.read().epoch;
        match self.refresh_from(epoch).await {
            Ok(keys) => {
                tracing::info!(source = %keys.source(), keys = keys.len(), "signing keys loaded")
            }
            Err(err) => {
                tracing::warn!(source = %self.source.describe(), error = %err, "initial key set fetch failed")
            }
        }
    }

    /// Find the key for `kid`, refreshing the cache at most once on a miss.
    pub async fn resolve(&self, kid: &str) -> Result<Arc<SigningKey>, ResolveError> {
        let observed_epoch = {
            let state = self.state.read();
            if let Some(key) = state.keys.as_ref().and_then(|keys| keys.get(kid)) {
                return Ok(key);
            }
            state.epoch
        };

        tracing::debug!(kid, "signing key not cached; refreshing key set");
        let keys = self.refresh_from(observed_epoch).await?;
        keys.get(kid).ok_or_else(|| ResolveError::NotFound(kid.to_string()))
    }

    /// Refresh unless someone already completed a refresh after
    /// `observed_epoch`, in which case that refresh's outcome is reused.
    async fn refresh_from(&self, observed_epoch: u64) -> Result<Arc<KeySet>, FetchError> {
        let _guard = self.refresh.lock().await;

        {
            let state = self.state.read();
            if state.epoch != observed_epoch {
                if let Some(err) = &state.last_failure {
                    return Err(err.clone());
                }
                if let Some(keys) = &state.keys {
                    return Ok(keys.clone());
                }
            }
        }

        // Dropping this future mid-fetch leaves the cache untouched.
        let outcome = self.source.fetch().await;

        let mut state = self.state.write();
        state.epoch += 1;
        match outcome {
            Ok(keys) => {
                let keys = Arc::new(keys);
                tracing::debug!(keys = keys.len(), epoch = state.epoch, "key set refreshed");
                state.keys = Some(keys.clone());
                state.last_failure = None;
                Ok(keys)
            }
            Err(err) => {
                tracing::warn!(source = %self.source.describe(), error = %err, "key set refresh failed; keeping previous keys");
                state.last_failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Identifiers of the cached keys and when they were fetched.
    pub fn cached_key_ids(&self) -> (Vec<String>, Option<DateTime<Utc>>) {
        let state = self.state.read();
        match &state.keys {
            Some(keys) => (keys.key_ids(), Some(keys.fetched_at())),
            None => (Vec::new(), None),
        }
    }
}

impl core::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("source", &self.source.describe())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, StaticKeySource};
    use std::sync::atomic::Ordering;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// One-shot HTTP server answering with a chunked body and no
    /// Content-Length.
    async fn chunked_server(body: Vec<u8>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;

            let mut response = b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n".to_vec();
            for chunk in body.chunks(8 * 1024) {
                response.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                response.extend_from_slice(chunk);
                response.extend_from_slice(b"\r\n");
            }
            response.extend_from_slice(b"0\r\n\r\n");
            // The client may hang up early once it has seen too much.
            let _ = stream.write_all(&response).await;
        });
        format!("http://{addr}/certs")
    }

    #[tokio::test]
    async fn chunked_key_set_within_the_cap_is_read() {
        let body = serde_json::to_vec(&testing::jwks_json(&[testing::jwk_a()])).unwrap();
        let source = HttpKeySetSource::new(chunked_server(body).await, Duration::from_secs(2)).unwrap();

        let keys = source.fetch().await.unwrap();
        assert_eq!(keys.key_ids(), vec![testing::KID_A.to_string()]);
    }

    #[tokio::test]
    async fn chunked_key_set_over_the_cap_is_refused_while_streaming() {
        let mut body = br#"{"keys":[],"padding":""#.to_vec();
        body.extend(std::iter::repeat_n(b'x', MAX_JWKS_BYTES * 2));
        body.extend_from_slice(br#""}"#);
        let source = HttpKeySetSource::new(chunked_server(body).await, Duration::from_secs(2)).unwrap();

        assert_eq!(source.fetch().await.unwrap_err(), FetchError::TooLarge);
    }

    fn resolver(source: &Arc<StaticKeySource>) -> KeyResolver {
        KeyResolver::new(source.clone())
    }

    #[tokio::test]
    async fn cached_key_is_served_without_fetching() {
        let source = Arc::new(StaticKeySource::new(vec![testing::jwk_a()]));
        let resolver = resolver(&source);

        resolver.prime().await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            let key = resolver.resolve(testing::KID_A).await.unwrap();
            assert_eq!(key.kid(), testing::KID_A);
        }
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_kid_refreshes_exactly_once() {
        let source = Arc::new(StaticKeySource::new(vec![testing::jwk_a()]));
        let resolver = resolver(&source);
        resolver.prime().await;

        let err = resolver.resolve("2").await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound("2".into()));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rotated_key_is_picked_up_on_miss() {
        let source = Arc::new(StaticKeySource::new(vec![testing::jwk_a()]));
        let resolver = resolver(&source);
        resolver.prime().await;

        source.set_keys(vec![testing::jwk_a(), testing::jwk_b()]);
        let key = resolver.resolve(testing::KID_B).await.unwrap();
        assert_eq!(key.kid(), testing::KID_B);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_fetch() {
        let source = Arc::new(
            StaticKeySource::new(vec![testing::jwk_a(), testing::jwk_b()])
                .with_delay(Duration::from_millis(50)),
        );
        let resolver = Arc::new(resolver(&source));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve(testing::KID_B).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_keys() {
        let source = Arc::new(StaticKeySource::new(vec![testing::jwk_a()]));
        let resolver = resolver(&source);
        resolver.prime().await;

        source.fail_with(Some(FetchError::Status(503)));
        let err = resolver.resolve("rotated").await.unwrap_err();
        assert_eq!(err, ResolveError::Source(FetchError::Status(503)));

        // The previously cached key still resolves without another fetch.
        let fetches = source.fetches.load(Ordering::SeqCst);
        assert!(resolver.resolve(testing::KID_A).await.is_ok());
        assert_eq!(source.fetches.load(Ordering::SeqCst), fetches);

        // Recovery: the next miss fetches again.
        source.fail_with(None);
        source.set_keys(vec![testing::jwk_a(), testing::jwk_b()]);
        assert!(resolver.resolve(testing::KID_B).await.is_ok());
    }

    #[tokio::test]
    async fn failed_prime_is_not_fatal() {
        let source = Arc::new(StaticKeySource::new(vec![testing::jwk_a()]));
        source.fail_with(Some(FetchError::Timeout));
        let resolver = resolver(&source);

        resolver.prime().await;
        assert_eq!(resolver.cached_key_ids(), (Vec::new(), None));

        source.fail_with(None);
        assert!(resolver.resolve(testing::KID_A).await.is_ok());
        assert_eq!(resolver.cached_key_ids().0, vec![testing::KID_A.to_string()]);
    }
}
