use std::sync::Arc;

use fetch_core::{HttpFetcher, StreamingFetcher};
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::config::SessionConfig;
use crate::error::TtsError;
use crate::format::OutputFormat;
use crate::session::SynthesisSession;
use crate::ulaw;

/// Shared state for every session: an immutable config snapshot, the
/// fetcher and the cache store.
pub struct SynthesisEngine {
    config: Arc<SessionConfig>,
    format: OutputFormat,
    fetcher: Arc<dyn StreamingFetcher>,
    cache: Option<CacheStore>,
}

impl SynthesisEngine {
    /// Validates `config` and prepares the cache directory. A directory that
    /// cannot be created disables caching instead of failing.
    pub fn open(
        config: SessionConfig,
        fetcher: Arc<dyn StreamingFetcher>,
    ) -> Result<Self, TtsError> {
        let format = config.validate()?;
        ulaw::decode_table_init();

        let cache = if config.cache_enabled {
            let store = CacheStore::new(&config.cache_dir);
            match store.ensure_dir() {
                Ok(()) => {
                    info!("Audio cache enabled at {}", store.dir().display());
                    Some(store)
                }
                Err(e) => {
                    warn!(
                        "Failed to create cache dir {}, caching disabled: {e}",
                        store.dir().display()
                    );
                    None
                }
            }
        } else {
            None
        };

        info!(
            "Synthesis engine opened: voice={}, model={}, format={}, frame={}ms",
            config.voice_id, config.model_id, format, config.frame_ms
        );
        Ok(Self {
            config: Arc::new(config),
            format,
            fetcher,
            cache,
        })
    }

    /// Opens an engine that talks to the provider over HTTPS.
    pub fn with_http(config: SessionConfig) -> Result<Self, TtsError> {
        let fetcher = HttpFetcher::new()
            .with_user_agent(concat!("tts-bridge/", env!("CARGO_PKG_VERSION")));
        Self::open(config, Arc::new(fetcher))
    }

    pub fn session(&self) -> SynthesisSession {
        SynthesisSession::new(
            self.config.clone(),
            self.format.clone(),
            self.fetcher.clone(),
            self.cache.clone(),
        )
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    pub fn frame_bytes(&self) -> usize {
        self.config.frame_bytes(&self.format)
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    /// Lifecycle teardown. Sessions clean up their own workers on drop.
    pub fn close(self) {
        info!("Synthesis engine closed");
    }
}
