//! AI backends and the selector that builds them from settings
//!
//! Every backend turns a [`TicketContent`] into a lazy [`ChunkStream`]:
//! nothing touches the network until the stream is first polled. Backend
//! failures are yielded as `Err` items and classified by the summarizer.
//!
//! - [`MockProvider`]: offline heuristics, always available
//! - [`OpenAiProvider`], [`AnthropicProvider`]: native token streaming
//! - [`GeminiProvider`]: single request replayed through the simulator

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod prompt;
pub mod relay;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;

use futures::stream::BoxStream;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::settings::ProviderSettings;
use crate::types::{ProviderKind, StreamChunk, TicketContent};

/// Lazily produced summary chunks.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A constructed backend, ready to summarize.
#[derive(Debug, Clone)]
pub enum Provider {
    Mock(MockProvider),
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
    Gemini(GeminiProvider),
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Mock(_) => ProviderKind::Mock,
            Provider::OpenAi(_) => ProviderKind::OpenAi,
            Provider::Anthropic(_) => ProviderKind::Anthropic,
            Provider::Gemini(_) => ProviderKind::Gemini,
        }
    }

    pub fn generate_summary(&self, input: &TicketContent) -> ChunkStream {
        match self {
            Provider::Mock(p) => p.generate_summary(input),
            Provider::OpenAi(p) => p.generate_summary(input),
            Provider::Anthropic(p) => p.generate_summary(input),
            Provider::Gemini(p) => p.generate_summary(input),
        }
    }
}

/// Build the backend for `explicit`, or the configured default.
///
/// Fails with [`Error::ProviderNotConfigured`] before any network activity
/// when the chosen backend has no API key.
pub fn select_provider(
    settings: &ProviderSettings,
    explicit: Option<ProviderKind>,
) -> Result<Provider> {
    let kind = explicit.unwrap_or(settings.default_provider);
    let Some(backend) = settings.backend(kind) else {
        return Ok(Provider::Mock(MockProvider::default()));
    };

    let api_key = backend
        .credential()
        .ok_or_else(|| Error::ProviderNotConfigured {
            provider: kind,
            message: format!("{} API key is not configured", kind.display_name()),
        })?
        .to_string();

    let http = http_client()?;
    let model = backend.model.clone();
    let endpoint = backend.endpoint.clone();
    tracing::debug!(provider = %kind, model = %model, "Backend selected");

    Ok(match kind {
        ProviderKind::OpenAi => Provider::OpenAi(OpenAiProvider::new(http, api_key, model, endpoint)),
        ProviderKind::Anthropic => {
            Provider::Anthropic(AnthropicProvider::new(http, api_key, model, endpoint))
        }
        ProviderKind::Gemini => Provider::Gemini(GeminiProvider::new(http, api_key, model, endpoint)),
        ProviderKind::Mock => Provider::Mock(MockProvider::default()),
    })
}

/// Backends usable with the current settings; mock is always first.
pub fn available_providers(settings: &ProviderSettings) -> Vec<ProviderKind> {
    ProviderKind::ALL
        .into_iter()
        .filter(|kind| {
            settings
                .backend(*kind)
                .map_or(true, |backend| backend.credential().is_some())
        })
        .collect()
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}
