//! Streaming transfer coordinator.
//!
//! Two independent tasks per streamed response: a producer pulls chunks from
//! the upstream and pushes them into a bounded queue; the consumer (the
//! response body handed to the server) pulls them out and yields them to the
//! client, optionally buffering a copy for the cache. End-of-stream is a
//! `None` sentinel in the queue. When the client disconnects the consumer
//! drops, and the producer exits on its next send (closed channel or
//! timeout).

use std::{io, sync::Arc, time::{Duration, Instant}};

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::cache::{ResponseCache, append_stream_body};

/// Producer-side queue push timeout; expiring it is fatal to the relay.
pub const PRODUCER_PUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Consumer-side queue pull timeout; expiring it aborts the request.
pub const CONSUMER_GET_TIMEOUT: Duration = Duration::from_secs(15);

/// Streams larger than this are not cached.
pub const CACHE_BUFFER_MAX: usize = 8 * 1024 * 1024;

type ChunkResult = Result<Bytes, io::Error>;

/// Relay tuning, normally taken straight from the transport config.
#[derive(Debug, Clone, Copy)]
pub struct RelayOptions {
    /// Queue capacity, in chunks.
    pub capacity: usize,
    /// Oversized upstream chunks are split to at most this many bytes.
    pub chunk_size: usize,
    /// Cache-population cutoff.
    pub cache_buffer_max: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            capacity: 15,
            chunk_size: 16 * 1024,
            cache_buffer_max: CACHE_BUFFER_MAX,
        }
    }
}

/// Where the consumer writes the finished body, when caching is on.
pub struct CachePopulate {
    pub cache: Arc<dyn ResponseCache>,
    /// Origin URL, the cache key.
    pub url: String,
    pub mime: String,
}

struct ConsumerState {
    rx: mpsc::Receiver<Option<ChunkResult>>,
    populate: Option<CachePopulate>,
    /// `None` once caching was abandoned (or never requested).
    buffer: Option<Vec<u8>>,
    cache_buffer_max: usize,
    done: bool,
    total: usize,
    started: Instant,
}

/// Spawn the producer and return the consumer stream.
///
/// Chunks are yielded in upstream arrival order; the cache entry is updated
/// only after the sentinel, i.e. after the last chunk was handed over.
pub fn relay_stream(
    upstream: BoxStream<'static, ChunkResult>,
    options: RelayOptions,
    populate: Option<CachePopulate>,
) -> impl Stream<Item = ChunkResult> + Send + 'static {
    let (tx, rx) = mpsc::channel::<Option<ChunkResult>>(options.capacity.max(1));

    tokio::spawn(produce(upstream, tx, options.chunk_size.max(1)));

    let state = ConsumerState {
        rx,
        buffer: populate.as_ref().map(|_| Vec::new()),
        populate,
        cache_buffer_max: options.cache_buffer_max,
        done: false,
        total: 0,
        started: Instant::now(),
    };

    futures_util::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        match tokio::time::timeout(CONSUMER_GET_TIMEOUT, state.rx.recv()).await {
            // Consumer starved: upstream (or producer) stalled for too long.
            Err(_) => {
                tracing::warn!("stream consumer timed out waiting for a chunk, aborting");
                state.done = true;
                Some((
                    Err(io::Error::new(io::ErrorKind::TimedOut, "stream relay starved")),
                    state,
                ))
            }
            // Producer died without a sentinel (its own timeout or panic).
            Ok(None) => {
                state.done = true;
                None
            }
            // Terminal sentinel: flush the cache copy and finish.
            Ok(Some(None)) => {
                state.done = true;
                tracing::debug!(
                    total = state.total,
                    elapsed_ms = state.started.elapsed().as_millis() as u64,
                    "stream relay complete"
                );
                if let (Some(populate), Some(buffer)) = (state.populate.take(), state.buffer.take())
                {
                    append_stream_body(
                        populate.cache.as_ref(),
                        &populate.url,
                        &populate.mime,
                        Bytes::from(buffer),
                    )
                    .await;
                }
                None
            }
            Ok(Some(Some(Ok(chunk)))) => {
                if let Some(buffer) = state.buffer.as_mut() {
                    if buffer.len() + chunk.len() > state.cache_buffer_max {
                        tracing::debug!(
                            limit = state.cache_buffer_max,
                            "stream exceeds cache buffer limit, not caching"
                        );
                        state.buffer = None;
                    } else {
                        buffer.extend_from_slice(&chunk);
                    }
                }
                state.total += chunk.len();
                Some((Ok(chunk), state))
            }
            Ok(Some(Some(Err(err)))) => {
                state.done = true;
                Some((Err(err), state))
            }
        }
    })
}

async fn produce(
    mut upstream: BoxStream<'static, ChunkResult>,
    tx: mpsc::Sender<Option<ChunkResult>>,
    chunk_size: usize,
) {
    while let Some(item) = upstream.next().await {
        match item {
            Ok(chunk) => {
                for piece in split_chunk(chunk, chunk_size) {
                    if !send_or_give_up(&tx, Some(Ok(piece))).await {
                        return;
                    }
                }
            }
            Err(err) => {
                send_or_give_up(&tx, Some(Err(err))).await;
                return;
            }
        }
    }
    send_or_give_up(&tx, None).await;
}

/// Push one queue item; `false` means the relay is over (consumer gone or
/// the put timeout expired).
async fn send_or_give_up(tx: &mpsc::Sender<Option<ChunkResult>>, item: Option<ChunkResult>) -> bool {
    match tx.send_timeout(item, PRODUCER_PUT_TIMEOUT).await {
        Ok(()) => true,
        Err(SendTimeoutError::Closed(_)) => {
            tracing::debug!("stream consumer dropped, stopping producer");
            false
        }
        Err(SendTimeoutError::Timeout(_)) => {
            tracing::error!(
                timeout_secs = PRODUCER_PUT_TIMEOUT.as_secs(),
                "stream producer could not enqueue a chunk in time, aborting relay"
            );
            false
        }
    }
}

fn split_chunk(mut chunk: Bytes, size: usize) -> Vec<Bytes> {
    if chunk.len() <= size {
        return vec![chunk];
    }
    let mut pieces = Vec::with_capacity(chunk.len() / size + 1);
    while chunk.len() > size {
        pieces.push(chunk.split_to(size));
    }
    if !chunk.is_empty() {
        pieces.push(chunk);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;
    use crate::cache::{CacheMeta, CachedResponse, MemoryCache};

    fn upstream_of(chunks: Vec<&'static [u8]>) -> BoxStream<'static, ChunkResult> {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<ChunkResult>>(),
        )
        .boxed()
    }

    async fn collect_ok(s: impl Stream<Item = ChunkResult>) -> Vec<u8> {
        let chunks: Vec<_> = s.collect().await;
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk.expect("chunk"));
        }
        out
    }

    #[test]
    fn test_split_chunk() {
        let pieces = split_chunk(Bytes::from_static(b"abcdefghij"), 4);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], Bytes::from_static(b"abcd"));
        assert_eq!(pieces[2], Bytes::from_static(b"ij"));

        assert_eq!(split_chunk(Bytes::from_static(b"ab"), 4).len(), 1);
    }

    #[tokio::test]
    async fn test_relay_preserves_order_and_content() {
        let relay = relay_stream(
            upstream_of(vec![b"hello ", b"streaming ", b"world"]),
            RelayOptions::default(),
            None,
        );
        let body = collect_ok(relay).await;
        assert_eq!(body, b"hello streaming world");
    }

    #[tokio::test]
    async fn test_relay_rechunks_large_chunks() {
        let big: &'static [u8] = b"0123456789abcdef0123456789abcdef";
        let options = RelayOptions {
            chunk_size: 8,
            ..RelayOptions::default()
        };
        let relay = relay_stream(upstream_of(vec![big]), options, None);
        let chunks: Vec<_> = relay.collect().await;
        assert_eq!(chunks.len(), 4);
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(body, big);
    }

    #[tokio::test]
    async fn test_relay_propagates_upstream_error() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ])
        .boxed();
        let relay = relay_stream(upstream, RelayOptions::default(), None);
        let chunks: Vec<_> = relay.collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(chunks[1].is_err());
    }

    async fn seeded_cache(url: &str) -> Arc<MemoryCache> {
        let cache = Arc::new(MemoryCache::new(16));
        cache
            .put_obj(
                url,
                CachedResponse {
                    status: 200,
                    headers: vec![("content-type".into(), "video/mp4".into())],
                    body: Bytes::new(),
                },
                CacheMeta {
                    expires_at: Instant::now() + Duration::from_secs(60),
                    last_modified: None,
                    without_content: true,
                    obj_size: 0,
                },
            )
            .await;
        cache
    }

    #[tokio::test]
    async fn test_relay_populates_cache_after_emit() {
        let url = "https://origin.com/v.mp4";
        let cache = seeded_cache(url).await;
        let relay = relay_stream(
            upstream_of(vec![b"aaa", b"bbb"]),
            RelayOptions::default(),
            Some(CachePopulate {
                cache: cache.clone(),
                url: url.into(),
                mime: "video/mp4".into(),
            }),
        );
        let body = collect_ok(relay).await;
        assert_eq!(body, b"aaabbb");

        let info = cache.get_info(url).await.unwrap();
        assert!(!info.without_content);
        assert_eq!(cache.get_obj(url).await.unwrap().body, Bytes::from_static(b"aaabbb"));
    }

    #[tokio::test]
    async fn test_relay_abandons_cache_over_limit() {
        let url = "https://origin.com/big.mp4";
        let cache = seeded_cache(url).await;
        let options = RelayOptions {
            cache_buffer_max: 4,
            ..RelayOptions::default()
        };
        let relay = relay_stream(
            upstream_of(vec![b"aaa", b"bbb", b"ccc"]),
            options,
            Some(CachePopulate {
                cache: cache.clone(),
                url: url.into(),
                mime: "video/mp4".into(),
            }),
        );
        // the client still gets the whole stream
        let body = collect_ok(relay).await;
        assert_eq!(body, b"aaabbbccc");

        // but the entry stays body-less
        let info = cache.get_info(url).await.unwrap();
        assert!(info.without_content);
    }

    #[tokio::test]
    async fn test_relay_delivers_incrementally() {
        use tokio_stream::wrappers::ReceiverStream;

        let (tx, rx) = tokio::sync::mpsc::channel::<ChunkResult>(4);
        let relay = relay_stream(
            ReceiverStream::new(rx).boxed(),
            RelayOptions::default(),
            None,
        );
        futures_util::pin_mut!(relay);

        tx.send(Ok(Bytes::from_static(b"first"))).await.unwrap();
        assert_eq!(
            relay.next().await.unwrap().unwrap(),
            Bytes::from_static(b"first")
        );

        // the second chunk arrives only after the first was consumed
        tx.send(Ok(Bytes::from_static(b"second"))).await.unwrap();
        assert_eq!(
            relay.next().await.unwrap().unwrap(),
            Bytes::from_static(b"second")
        );

        drop(tx);
        assert!(relay.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_times_out_on_stalled_upstream() {
        let relay = relay_stream(stream::pending().boxed(), RelayOptions::default(), None);
        futures_util::pin_mut!(relay);

        let first = relay.next().await;
        match first {
            Some(Err(err)) => assert_eq!(err.kind(), io::ErrorKind::TimedOut),
            other => panic!("expected timeout error, got {other:?}"),
        }
        assert!(relay.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_gives_up_when_consumer_stalls() {
        let chunks: Vec<&'static [u8]> = vec![b"a"; 64];
        let options = RelayOptions {
            capacity: 1,
            ..RelayOptions::default()
        };
        let relay = relay_stream(upstream_of(chunks), options, None);

        // Don't poll the relay at all: the producer fills the 1-slot queue,
        // then its put times out and it aborts.
        tokio::time::sleep(PRODUCER_PUT_TIMEOUT + Duration::from_secs(1)).await;

        // Whatever was queued is still delivered, then the stream ends
        // without a sentinel.
        let delivered = relay.collect::<Vec<_>>().await;
        assert!(delivered.len() < 64);
        assert!(delivered.iter().all(|c| c.is_ok()));
    }
}
