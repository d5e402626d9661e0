//! Provider settings resolution and caching
//!
//! Each field is taken from the first layer that sets it to a non-empty
//! value: the persisted `ai_config` row, the config file, the environment,
//! then a built-in default.
//!
//! [`SettingsStore`] keeps the resolved value for `settings_ttl_secs` and is
//! invalidated whenever the persisted row changes.

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::{AiConfig, BackendConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::request::ValidationErrors;
use crate::types::ProviderKind;

pub const DEFAULT_CACHE_TTL_MS: u64 = 3_600_000;

/// Longest accepted summary TTL (365 days)
pub const MAX_CACHE_TTL_MS: u64 = 31_536_000_000;

const MASK_CHAR: char = '\u{2022}';

/// Reads one environment variable; injectable for tests.
pub type EnvLookup = fn(&str) -> Option<String>;

/// The process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Defaults and environment variable names for one backend.
struct BackendDefaults {
    key_var: &'static str,
    model_var: &'static str,
    model: &'static str,
    endpoint: &'static str,
}

const OPENAI: BackendDefaults = BackendDefaults {
    key_var: "OPENAI_API_KEY",
    model_var: "OPENAI_MODEL",
    model: "gpt-4o-mini",
    endpoint: "https://api.openai.com",
};

const ANTHROPIC: BackendDefaults = BackendDefaults {
    key_var: "ANTHROPIC_API_KEY",
    model_var: "ANTHROPIC_MODEL",
    model: "claude-haiku-4-5-20251001",
    endpoint: "https://api.anthropic.com",
};

const GEMINI: BackendDefaults = BackendDefaults {
    key_var: "GEMINI_API_KEY",
    model_var: "GEMINI_MODEL",
    model: "gemini-2.0-flash",
    endpoint: "https://generativelanguage.googleapis.com",
};

// ============================================
// Persisted row
// ============================================

/// The `ai_config` singleton row. `None` columns defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredSettings {
    pub default_provider: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub cache_ttl_ms: Option<u64>,
}

// ============================================
// Resolved settings
// ============================================

/// Connection details for one credentialed backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
}

impl BackendSettings {
    /// The API key, if one is set and non-empty.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

/// Fully resolved provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub default_provider: ProviderKind,
    pub openai: BackendSettings,
    pub anthropic: BackendSettings,
    pub gemini: BackendSettings,
    pub cache_ttl_ms: u64,
}

impl ProviderSettings {
    /// Layer the persisted row over the config file, environment and defaults.
    pub fn resolve(stored: Option<&StoredSettings>, config: &AiConfig, env: EnvLookup) -> Self {
        let empty = StoredSettings::default();
        let stored = stored.unwrap_or(&empty);

        let provider_name = first_set([
            stored.default_provider.clone(),
            config.default_provider.clone(),
            env("AI_PROVIDER"),
        ]);
        let default_provider = match provider_name {
            None => ProviderKind::Mock,
            Some(name) => name.parse().unwrap_or_else(|_| {
                tracing::warn!(provider = %name, "Unknown default provider, using mock");
                ProviderKind::Mock
            }),
        };

        let cache_ttl_ms = stored
            .cache_ttl_ms
            .or(config.cache_ttl_ms)
            .or_else(|| {
                env("AI_CACHE_TTL_MS")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .filter(|ms| *ms > 0)
            })
            .unwrap_or(DEFAULT_CACHE_TTL_MS);
        if cache_ttl_ms > MAX_CACHE_TTL_MS {
            tracing::warn!(
                cache_ttl_ms,
                max = MAX_CACHE_TTL_MS,
                "Cache TTL too long, clamping"
            );
        }
        let cache_ttl_ms = cache_ttl_ms.min(MAX_CACHE_TTL_MS);

        Self {
            default_provider,
            openai: resolve_backend(
                &OPENAI,
                &stored.openai_api_key,
                &stored.openai_model,
                &config.openai,
                env,
            ),
            anthropic: resolve_backend(
                &ANTHROPIC,
                &stored.anthropic_api_key,
                &stored.anthropic_model,
                &config.anthropic,
                env,
            ),
            gemini: resolve_backend(
                &GEMINI,
                &stored.gemini_api_key,
                &stored.gemini_model,
                &config.gemini,
                env,
            ),
            cache_ttl_ms,
        }
    }

    /// Settings for a credentialed backend; `None` for mock.
    pub fn backend(&self, kind: ProviderKind) -> Option<&BackendSettings> {
        match kind {
            ProviderKind::Mock => None,
            ProviderKind::OpenAi => Some(&self.openai),
            ProviderKind::Anthropic => Some(&self.anthropic),
            ProviderKind::Gemini => Some(&self.gemini),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

fn resolve_backend(
    defaults: &BackendDefaults,
    stored_key: &Option<String>,
    stored_model: &Option<String>,
    config: &BackendConfig,
    env: EnvLookup,
) -> BackendSettings {
    BackendSettings {
        api_key: first_set([
            stored_key.clone(),
            config.api_key.clone(),
            env(defaults.key_var),
        ]),
        model: first_set([
            stored_model.clone(),
            config.model.clone(),
            env(defaults.model_var),
        ])
        .unwrap_or_else(|| defaults.model.to_string()),
        endpoint: first_set([config.endpoint.clone()])
            .unwrap_or_else(|| defaults.endpoint.to_string()),
    }
}

fn first_set<const N: usize>(layers: [Option<String>; N]) -> Option<String> {
    layers.into_iter().flatten().find(|v| !v.is_empty())
}

// ============================================
// Masked view
// ============================================

/// Hide all but the last four characters of a key.
pub fn mask_api_key(key: Option<&str>) -> Option<String> {
    let key = key.filter(|k| !k.is_empty())?;
    let len = key.chars().count();
    if len <= 4 {
        return Some(MASK_CHAR.to_string().repeat(len));
    }
    let tail: String = key.chars().skip(len - 4).collect();
    Some(format!("{}{tail}", MASK_CHAR.to_string().repeat(len - 4)))
}

/// Settings as shown to clients, with keys masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub default_provider: ProviderKind,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub cache_ttl_ms: u64,
}

impl From<&ProviderSettings> for SettingsView {
    fn from(settings: &ProviderSettings) -> Self {
        Self {
            default_provider: settings.default_provider,
            openai_api_key: mask_api_key(settings.openai.credential()),
            openai_model: settings.openai.model.clone(),
            anthropic_api_key: mask_api_key(settings.anthropic.credential()),
            anthropic_model: settings.anthropic.model.clone(),
            gemini_api_key: mask_api_key(settings.gemini.credential()),
            gemini_model: settings.gemini.model.clone(),
            cache_ttl_ms: settings.cache_ttl_ms,
        }
    }
}

// ============================================
// Partial update
// ============================================

/// A partial settings update.
///
/// For each field, absent leaves the stored value alone. For keys, `null`
/// or `""` clears, a masked value (as returned by [`SettingsView`]) is
/// ignored, and anything else replaces. For models, `null` or `""` clears.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsUpdate {
    pub default_provider: Option<String>,
    pub cache_ttl_ms: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub openai_api_key: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub openai_model: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub anthropic_api_key: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub anthropic_model: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub gemini_api_key: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub gemini_model: Option<Option<String>>,
}

/// Distinguishes an explicit `null` from an absent field.
fn nullable<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl SettingsUpdate {
    pub fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if let Some(name) = &self.default_provider {
            if name.parse::<ProviderKind>().is_err() {
                errors.add(
                    "defaultProvider",
                    "must be one of: mock, openai, anthropic, gemini",
                );
            }
        }
        if let Some(ms) = self.cache_ttl_ms {
            if ms <= 0 {
                errors.add("cacheTtlMs", "must be a positive number of milliseconds");
            } else if ms as u64 > MAX_CACHE_TTL_MS {
                errors.add("cacheTtlMs", "must be at most 365 days (31536000000 ms)");
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Merge into the persisted row. Call [`Self::validate`] first.
    pub fn apply_to(self, stored: &mut StoredSettings) {
        if let Some(name) = self.default_provider {
            stored.default_provider = Some(name);
        }
        if let Some(ms) = self.cache_ttl_ms.and_then(|ms| u64::try_from(ms).ok()) {
            stored.cache_ttl_ms = Some(ms);
        }
        apply_key(&mut stored.openai_api_key, self.openai_api_key);
        apply_key(&mut stored.anthropic_api_key, self.anthropic_api_key);
        apply_key(&mut stored.gemini_api_key, self.gemini_api_key);
        apply_model(&mut stored.openai_model, self.openai_model);
        apply_model(&mut stored.anthropic_model, self.anthropic_model);
        apply_model(&mut stored.gemini_model, self.gemini_model);
    }
}

fn apply_key(slot: &mut Option<String>, update: Option<Option<String>>) {
    match update {
        None => {}
        Some(None) => *slot = None,
        Some(Some(value)) if value.is_empty() => *slot = None,
        Some(Some(value)) if value.contains(MASK_CHAR) => {}
        Some(Some(value)) => *slot = Some(value),
    }
}

fn apply_model(slot: &mut Option<String>, update: Option<Option<String>>) {
    if let Some(value) = update {
        *slot = value.filter(|v| !v.is_empty());
    }
}

// ============================================
// Settings store
// ============================================

/// Owns the resolved [`ProviderSettings`] and refreshes them after a TTL.
pub struct SettingsStore {
    db: Arc<Database>,
    config: AiConfig,
    env: EnvLookup,
    ttl: Duration,
    cached: Mutex<Option<(ProviderSettings, Instant)>>,
}

impl SettingsStore {
    pub fn new(db: Arc<Database>, config: AiConfig) -> Self {
        let ttl = config.settings_ttl();
        Self {
            db,
            config,
            env: process_env,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Replace the environment lookup.
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Current settings, reloading once the cached copy is older than the TTL.
    pub fn current(&self) -> Result<ProviderSettings> {
        {
            let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((settings, loaded_at)) = cached.as_ref() {
                if loaded_at.elapsed() < self.ttl {
                    return Ok(settings.clone());
                }
            }
        }

        let stored = self.db.get_stored_settings()?;
        let settings = ProviderSettings::resolve(stored.as_ref(), &self.config, self.env);
        tracing::debug!(
            default_provider = %settings.default_provider,
            cache_ttl_ms = settings.cache_ttl_ms,
            "Provider settings loaded"
        );

        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((settings.clone(), Instant::now()));
        Ok(settings)
    }

    /// Drop the cached copy; the next [`Self::current`] reloads.
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Validate and persist a partial update, then return the fresh settings.
    pub fn update(&self, update: SettingsUpdate) -> Result<ProviderSettings> {
        update.validate().map_err(Error::Validation)?;

        let mut stored = self.db.get_stored_settings()?.unwrap_or_default();
        update.apply_to(&mut stored);
        self.db.save_stored_settings(&stored)?;
        tracing::info!("Provider settings updated");

        self.invalidate();
        self.current()
    }
}
