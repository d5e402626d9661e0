//! Summarization orchestration
//!
//! [`Summarizer::summarize`] resolves the request input, short-circuits on a
//! cached result, selects a backend, then relays its chunks from a spawned
//! task through a bounded channel. Everything that can fail before the
//! stream opens is returned as an `Err`; after that, failures become a
//! terminal `error` chunk.
//!
//! ```text
//! request ─► resolve ticket ─► cache hit? ─yes─► Cached(result)
//!                                  │no
//!                                  ▼
//!                          select backend ─► spawn relay ─► Streaming(rx)
//! ```

pub mod classify;
pub mod parser;
pub mod simulator;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{Error, Result};
use crate::providers::{select_provider, ChunkStream};
use crate::request::{SummarizeRequest, SummaryTarget};
use crate::settings::SettingsStore;
use crate::store::{SummaryCache, TicketStore};
use crate::types::{ProviderKind, StreamChunk, StructuredResult};

use classify::{user_message, INCOMPLETE_MESSAGE};

/// Chunks of one summary, ending in exactly one `done` or `error`.
pub type SummaryStream = ReceiverStream<StreamChunk>;

/// What a summarize call produced.
pub enum SummaryOutcome {
    /// A live result from the cache; no backend was called
    Cached(StructuredResult),
    /// A stream that is already running
    Streaming {
        provider: ProviderKind,
        chunks: SummaryStream,
    },
}

impl std::fmt::Debug for SummaryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryOutcome::Cached(result) => f.debug_tuple("Cached").field(result).finish(),
            SummaryOutcome::Streaming { provider, .. } => f
                .debug_struct("Streaming")
                .field("provider", provider)
                .finish_non_exhaustive(),
        }
    }
}

/// Request-facing coordinator over the ticket store, cache and backends.
#[derive(Clone)]
pub struct Summarizer {
    tickets: Arc<dyn TicketStore>,
    cache: Arc<dyn SummaryCache>,
    settings: Arc<SettingsStore>,
    stream_timeout: Duration,
}

impl Summarizer {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        cache: Arc<dyn SummaryCache>,
        settings: Arc<SettingsStore>,
        stream_timeout: Duration,
    ) -> Self {
        Self {
            tickets,
            cache,
            settings,
            stream_timeout,
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Run one summarize request.
    ///
    /// Errors: [`Error::TicketNotFound`], [`Error::ProviderNotConfigured`],
    /// or a storage failure. Must be called inside a tokio runtime.
    pub async fn summarize(&self, request: SummarizeRequest) -> Result<SummaryOutcome> {
        let (ticket_id, input) = match request.target {
            SummaryTarget::Ticket(id) => {
                let Some(content) = self.tickets.find_ticket(&id)? else {
                    tracing::info!(ticket_id = %id, "Summary requested for unknown ticket");
                    return Err(Error::TicketNotFound(id));
                };
                (Some(id), content)
            }
            SummaryTarget::AdHoc(content) => (None, content),
        };

        // An explicit backend choice always recomputes
        if let (Some(id), None) = (&ticket_id, request.provider) {
            match self.cache.get(id) {
                Ok(Some(result)) => {
                    tracing::info!(ticket_id = %id, "Serving cached summary");
                    return Ok(SummaryOutcome::Cached(result));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(ticket_id = %id, error = %e, "Summary cache read failed"),
            }
        }

        let settings = self.settings.current()?;
        let provider = select_provider(&settings, request.provider)?;
        let kind = provider.kind();

        tracing::info!(
            ticket_id = ticket_id.as_deref().unwrap_or("-"),
            provider = %kind,
            "Starting summary stream"
        );

        let relay = Relay {
            chunks: provider.generate_summary(&input),
            sink: ticket_id.map(|ticket_id| CacheSink {
                cache: Arc::clone(&self.cache),
                ticket_id,
                ttl: settings.cache_ttl(),
            }),
            provider: kind,
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(relay.run(tx, self.stream_timeout));

        Ok(SummaryOutcome::Streaming {
            provider: kind,
            chunks: ReceiverStream::new(rx),
        })
    }
}

/// Where a ticket-bound stream stores its final result.
struct CacheSink {
    cache: Arc<dyn SummaryCache>,
    ticket_id: String,
    ttl: Duration,
}

impl CacheSink {
    fn store(&self, result: &StructuredResult) {
        match self.cache.put(&self.ticket_id, result, self.ttl) {
            Ok(()) => tracing::debug!(ticket_id = %self.ticket_id, "Summary cached"),
            Err(e) => {
                tracing::warn!(ticket_id = %self.ticket_id, error = %e, "Failed to cache summary")
            }
        }
    }
}

/// How the relay ended.
enum RelayEnd {
    /// A terminal chunk was delivered
    Finished,
    /// The receiver went away
    Disconnected,
}

struct Relay {
    chunks: ChunkStream,
    sink: Option<CacheSink>,
    provider: ProviderKind,
}

impl Relay {
    /// The deadline bounds the backend up to its terminal chunk. Delivering
    /// that chunk, and caching a `done` result, happen after the race.
    async fn run(self, tx: mpsc::Sender<StreamChunk>, limit: Duration) {
        let Relay {
            mut chunks,
            sink,
            provider,
        } = self;
        let mut forwarded = 0usize;

        let terminal =
            tokio::time::timeout(limit, next_terminal(&mut chunks, &tx, &mut forwarded, provider))
                .await;
        drop(chunks);

        let end = match terminal {
            Ok(Some(chunk)) => {
                if let (StreamChunk::Done { result }, Some(sink)) = (&chunk, &sink) {
                    sink.store(result);
                }
                deliver(&tx, chunk, &mut forwarded).await
            }
            Ok(None) => RelayEnd::Disconnected,
            Err(_) => {
                let err = Error::Timeout(limit);
                tracing::warn!(provider = %provider, chunks = forwarded, error = %err, "Summary stream timed out");
                let _ = tx.send(StreamChunk::error(user_message(&err))).await;
                return;
            }
        };

        match end {
            RelayEnd::Finished => {
                tracing::info!(provider = %provider, chunks = forwarded, "Summary stream finished")
            }
            RelayEnd::Disconnected => {
                tracing::info!(provider = %provider, chunks = forwarded, "Client went away, summary stream cancelled")
            }
        }
    }
}

/// Forward non-terminal chunks and return the terminal one, or `None` if
/// the receiver went away first.
async fn next_terminal(
    chunks: &mut ChunkStream,
    tx: &mpsc::Sender<StreamChunk>,
    forwarded: &mut usize,
    provider: ProviderKind,
) -> Option<StreamChunk> {
    while let Some(item) = chunks.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                let message = user_message(&e);
                tracing::warn!(provider = %provider, error = %e, message = %message, "Backend failed mid-stream");
                return Some(StreamChunk::error(message));
            }
        };

        if chunk.is_terminal() {
            return Some(chunk);
        }
        if let RelayEnd::Disconnected = deliver(tx, chunk, forwarded).await {
            return None;
        }
    }

    tracing::warn!(provider = %provider, "Backend stream ended without a result");
    Some(StreamChunk::error(INCOMPLETE_MESSAGE))
}

async fn deliver(
    tx: &mpsc::Sender<StreamChunk>,
    chunk: StreamChunk,
    forwarded: &mut usize,
) -> RelayEnd {
    if tx.send(chunk).await.is_err() {
        return RelayEnd::Disconnected;
    }
    *forwarded += 1;
    RelayEnd::Finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiConfig;
    use crate::db::Database;
    use crate::types::{RiskLevel, TicketContent};
    use classify::{INVALID_KEY_MESSAGE, TIMEOUT_MESSAGE};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct FakeTickets {
        tickets: HashMap<String, TicketContent>,
        lookups: AtomicUsize,
    }

    impl TicketStore for FakeTickets {
        fn find_ticket(&self, id: &str) -> Result<Option<TicketContent>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.tickets.get(id).cloned())
        }
    }

    #[derive(Default)]
    struct FakeCache {
        entries: Mutex<HashMap<String, (StructuredResult, Duration)>>,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl SummaryCache for FakeCache {
        fn get(&self, ticket_id: &str) -> Result<Option<StructuredResult>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .entries
                .lock()
                .unwrap()
                .get(ticket_id)
                .map(|(r, _)| r.clone()))
        }

        fn put(&self, ticket_id: &str, result: &StructuredResult, ttl: Duration) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.entries
                .lock()
                .unwrap()
                .insert(ticket_id.to_string(), (result.clone(), ttl));
            Ok(())
        }

        fn invalidate(&self, ticket_id: &str) -> Result<()> {
            self.entries.lock().unwrap().remove(ticket_id);
            Ok(())
        }
    }

    struct Harness {
        tickets: Arc<FakeTickets>,
        cache: Arc<FakeCache>,
        summarizer: Summarizer,
    }

    fn harness(config: AiConfig, timeout: Duration) -> Harness {
        let mut tickets = FakeTickets::default();
        tickets.tickets.insert(
            "t-1".to_string(),
            TicketContent {
                title: "Crash when exporting".to_string(),
                description: "The app crashes when exporting a large report.".to_string(),
            },
        );
        let tickets = Arc::new(tickets);
        let cache = Arc::new(FakeCache::default());

        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let settings = SettingsStore::new(Arc::new(db), config).with_env(|_| None);

        let summarizer = Summarizer::new(
            tickets.clone(),
            cache.clone(),
            Arc::new(settings),
            timeout,
        );
        Harness {
            tickets,
            cache,
            summarizer,
        }
    }

    fn openai_config(server: &MockServer) -> AiConfig {
        let mut config = AiConfig::default();
        config.default_provider = Some("openai".to_string());
        config.openai.api_key = Some("sk-test".to_string());
        config.openai.endpoint = Some(server.uri());
        config
    }

    fn cached_result() -> StructuredResult {
        StructuredResult {
            summary: "Previously computed".to_string(),
            next_steps: vec!["Nothing".to_string()],
            risk_level: RiskLevel::Low,
            categories: vec!["task".to_string()],
        }
    }

    async fn collect(outcome: SummaryOutcome) -> Vec<StreamChunk> {
        match outcome {
            SummaryOutcome::Streaming { chunks, .. } => chunks.collect().await,
            SummaryOutcome::Cached(_) => panic!("expected a stream"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_writes_cache_with_configured_ttl() {
        let mut config = AiConfig::default();
        config.cache_ttl_ms = Some(90_000);
        let h = harness(config, Duration::from_secs(30));

        let outcome = h
            .summarizer
            .summarize(SummarizeRequest::for_ticket("t-1"))
            .await
            .unwrap();
        let chunks = collect(outcome).await;

        let Some(StreamChunk::Done { result }) = chunks.last() else {
            panic!("stream did not end with done");
        };
        assert_eq!(result.risk_level, RiskLevel::High);
        let entries = h.cache.entries.lock().unwrap();
        let (cached, ttl) = entries.get("t-1").unwrap();
        assert_eq!(cached, result);
        assert_eq!(*ttl, Duration::from_millis(90_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_short_circuits() {
        let h = harness(AiConfig::default(), Duration::from_secs(30));
        h.cache.put("t-1", &cached_result(), Duration::from_secs(60)).unwrap();

        let outcome = h
            .summarizer
            .summarize(SummarizeRequest::for_ticket("t-1"))
            .await
            .unwrap();
        assert!(matches!(outcome, SummaryOutcome::Cached(r) if r == cached_result()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_provider_bypasses_cache() {
        let h = harness(AiConfig::default(), Duration::from_secs(30));
        h.cache.put("t-1", &cached_result(), Duration::from_secs(60)).unwrap();

        let request = SummarizeRequest::for_ticket("t-1").with_provider(ProviderKind::Mock);
        let chunks = collect(h.summarizer.summarize(request).await.unwrap()).await;

        assert_eq!(h.cache.reads.load(Ordering::SeqCst), 0);
        let Some(StreamChunk::Done { result }) = chunks.last() else {
            panic!("stream did not end with done");
        };
        assert_ne!(result, &cached_result());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ad_hoc_requests_skip_cache() {
        let h = harness(AiConfig::default(), Duration::from_secs(30));

        let request = SummarizeRequest::ad_hoc("New onboarding flow", "Add a guided tour for new users.");
        let chunks = collect(h.summarizer.summarize(request).await.unwrap()).await;

        assert!(matches!(chunks.last(), Some(StreamChunk::Done { .. })));
        assert_eq!(h.cache.reads.load(Ordering::SeqCst), 0);
        assert_eq!(h.cache.writes.load(Ordering::SeqCst), 0);
        assert_eq!(h.tickets.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_ticket_touches_neither_cache_nor_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let h = harness(openai_config(&server), Duration::from_secs(30));

        let err = h
            .summarizer
            .summarize(SummarizeRequest::for_ticket("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TicketNotFound(id) if id == "missing"));
        assert_eq!(h.cache.reads.load(Ordering::SeqCst), 0);
        assert_eq!(h.cache.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_streaming() {
        let mut config = AiConfig::default();
        config.default_provider = Some("anthropic".to_string());
        let h = harness(config, Duration::from_secs(30));

        let err = h
            .summarizer
            .summarize(SummarizeRequest::ad_hoc("Broken login", "Nobody can sign in today."))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ProviderNotConfigured {
                provider: ProviderKind::Anthropic,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_ends_stream_with_error_and_no_cache_write() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;
        let h = harness(openai_config(&server), Duration::from_millis(200));

        let started = std::time::Instant::now();
        let chunks = collect(
            h.summarizer
                .summarize(SummarizeRequest::for_ticket("t-1"))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(chunks, vec![StreamChunk::error(TIMEOUT_MESSAGE)]);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(h.cache.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_error_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;
        let h = harness(openai_config(&server), Duration::from_secs(30));

        let chunks = collect(
            h.summarizer
                .summarize(SummarizeRequest::for_ticket("t-1"))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(chunks, vec![StreamChunk::error(INVALID_KEY_MESSAGE)]);
        assert_eq!(h.cache.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_backend_body_degrades_to_fallback_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(""),
            )
            .mount(&server)
            .await;
        let h = harness(openai_config(&server), Duration::from_secs(30));

        let chunks = collect(
            h.summarizer
                .summarize(SummarizeRequest::for_ticket("t-1"))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(
            chunks.last(),
            Some(&StreamChunk::Done {
                result: parser::fallback_result()
            })
        );
    }

    #[tokio::test]
    async fn test_stream_without_terminal_chunk_is_reported_incomplete() {
        let chunks: ChunkStream = futures::stream::iter(vec![Ok(StreamChunk::chunk(
            crate::types::SummaryField::Summary,
            "partial",
        ))])
        .boxed();
        let relay = Relay {
            chunks,
            sink: None,
            provider: ProviderKind::Mock,
        };

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(relay.run(tx, Duration::from_secs(5)));
        let received: Vec<StreamChunk> = ReceiverStream::new(rx).collect().await;

        assert_eq!(received.len(), 2);
        assert_eq!(received[1], StreamChunk::error(INCOMPLETE_MESSAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reader_still_gets_done_after_deadline() {
        let result = cached_result();
        let chunks: ChunkStream = futures::stream::iter(vec![
            Ok(StreamChunk::chunk(
                crate::types::SummaryField::Summary,
                "Previously computed",
            )),
            Ok(StreamChunk::Done {
                result: result.clone(),
            }),
        ])
        .boxed();
        let cache = Arc::new(FakeCache::default());
        let relay = Relay {
            chunks,
            sink: Some(CacheSink {
                cache: cache.clone(),
                ticket_id: "t-1".to_string(),
                ttl: Duration::from_secs(60),
            }),
            provider: ProviderKind::Mock,
        };

        let limit = Duration::from_secs(5);
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(relay.run(tx, limit));

        // The first chunk fills the buffer; `done` waits on the reader
        tokio::time::sleep(limit * 3).await;
        let received: Vec<StreamChunk> = ReceiverStream::new(rx).collect().await;

        assert_eq!(received.len(), 2);
        assert_eq!(received[1], StreamChunk::Done { result: result.clone() });
        let entries = cache.entries.lock().unwrap();
        assert_eq!(entries.get("t-1").map(|(r, _)| r), Some(&result));
    }
}
