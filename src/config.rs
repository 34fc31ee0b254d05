//! Runtime configuration, read from the process environment after `.env`
//! has been loaded.

use crate::input::MAX_MESSAGE_CHARS;
use crate::prompts::{AI_NAME, OWNER_NAME, WELCOME_MESSAGE};
use std::time::Duration;

pub const DEFAULT_STORAGE_KEY: &str = "chat-messages";
pub const DEFAULT_RESET_DELAY_MS: u64 = 100;
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:latest";

/// Which completion backend the controller talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    /// Server speaking the UI message stream protocol over SSE.
    UiStream {
        endpoint: String,
        api_key: Option<String>,
    },
    /// Local Ollama chat API.
    Ollama { host: String, model: String },
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatConfig {
    pub storage_key: String,
    /// Pause between clearing the chat and re-inserting the greeting.
    pub reset_delay: Duration,
    pub max_message_chars: usize,
    pub ai_name: String,
    pub owner_name: String,
    pub welcome_message: String,
    pub backend: BackendConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            reset_delay: Duration::from_millis(DEFAULT_RESET_DELAY_MS),
            max_message_chars: MAX_MESSAGE_CHARS,
            ai_name: AI_NAME.to_string(),
            owner_name: OWNER_NAME.to_string(),
            welcome_message: WELCOME_MESSAGE.to_string(),
            backend: BackendConfig::None,
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        // Priority: explicit endpoint, then opt-in local Ollama.
        let backend = if let Some(endpoint) = non_empty("CHAT_ENDPOINT") {
            BackendConfig::UiStream {
                endpoint,
                api_key: non_empty("CHAT_API_KEY"),
            }
        } else if is_truthy(lookup("LLM_USE_OLLAMA").as_deref()) {
            BackendConfig::Ollama {
                host: non_empty("OLLAMA_HOST").unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
                model: non_empty("LLM_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            }
        } else {
            BackendConfig::None
        };

        Self {
            storage_key: non_empty("CHAT_STORAGE_KEY").unwrap_or(defaults.storage_key),
            reset_delay: Duration::from_millis(parse_or(
                lookup("CHAT_RESET_DELAY_MS"),
                DEFAULT_RESET_DELAY_MS,
            )),
            max_message_chars: parse_or(lookup("CHAT_MAX_MESSAGE_CHARS"), MAX_MESSAGE_CHARS),
            ai_name: non_empty("CHAT_AI_NAME").unwrap_or(defaults.ai_name),
            owner_name: non_empty("CHAT_OWNER_NAME").unwrap_or(defaults.owner_name),
            welcome_message: non_empty("CHAT_WELCOME_MESSAGE").unwrap_or(defaults.welcome_message),
            backend,
        }
    }
}

/// Load `.env` from the working directory if there is one. Values already
/// present in the environment win.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!(error = %err, "failed to read .env"),
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr,
{
    raw.and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn is_truthy(raw: Option<&str>) -> bool {
    matches!(
        raw.unwrap_or("false").trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
