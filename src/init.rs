use std::fmt::Display;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{ChatAgent, Interaction};
use crate::cache::{FileStore, NamespacedCache, DEFAULT_CACHE_CAPACITY};
use crate::error::{AppError, Result};
use crate::stream::pacing::{PacingConfig, DEFAULT_SLICE_LEN, DEFAULT_TICK_INTERVAL};
use crate::types::AssistantSettings;

pub const CONVERSATION_CACHE_NAMESPACE: &str = "conversations";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Server the `ask` command talks to.
    pub assistant_url: String,
    pub settings: AssistantSettings,
    pub cache: CacheConfig,
    pub reply: ReplyConfig,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: NonZeroUsize,
    /// Where the conversation cache is persisted; in-memory only when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplyConfig {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let capacity: usize = parse_or(&lookup, "CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY)?;
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| AppError::validation("CACHE_CAPACITY must be greater than zero"))?;
        let tick_ms: u64 = parse_or(
            &lookup,
            "PACING_TICK_MS",
            DEFAULT_TICK_INTERVAL.as_millis() as u64,
        )?;
        if tick_ms == 0 {
            return Err(AppError::validation("PACING_TICK_MS must be greater than zero"));
        }

        let port = parse_or(&lookup, "PORT", 3000)?;

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            assistant_url: lookup("ASSISTANT_URL")
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", port)),
            settings: AssistantSettings {
                incremental_output: parse_or(&lookup, "INCREMENTAL_OUTPUT", true)?,
                pacing: PacingConfig {
                    tick_interval: Duration::from_millis(tick_ms),
                    slice_len: parse_or(&lookup, "PACING_SLICE_LEN", DEFAULT_SLICE_LEN)?,
                },
            },
            cache: CacheConfig {
                capacity,
                dir: lookup("CACHE_DIR").map(PathBuf::from),
            },
            reply: ReplyConfig {
                chunk_size: parse_or(&lookup, "REPLY_CHUNK_SIZE", 20)?,
                chunk_delay: Duration::from_millis(parse_or(&lookup, "REPLY_CHUNK_DELAY_MS", 50)?),
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::validation(format!("invalid {}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub chat_agent: ChatAgent,
    pub conversations: NamespacedCache<Vec<Interaction>>,
}

pub fn app_init(config: &Config) -> Result<Arc<AppState>> {
    let mut conversations = NamespacedCache::new(CONVERSATION_CACHE_NAMESPACE, config.cache.capacity);
    if let Some(dir) = &config.cache.dir {
        conversations = conversations.with_store(Arc::new(FileStore::new(dir)?));
        let restored = conversations.load()?;
        log::info!("✅ Restored {} conversations from {}", restored, dir.display());
    }

    let chat_agent = ChatAgent::new(config.reply.chunk_size, config.reply.chunk_delay);

    let state = Arc::new(AppState {
        chat_agent,
        conversations,
    });
    Ok(state)
}
