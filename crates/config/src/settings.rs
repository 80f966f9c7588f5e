use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub store: StoreSettings,
    pub chat: ChatSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub name: String,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Per-collection capacity of the in-process change bus.
    pub event_buffer: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatSettings {
    /// Conversation previews are cut to this many characters.
    pub preview_max_chars: usize,
    pub max_message_chars: usize,
    /// Upper bound on messages fetched when a chat is (re)loaded.
    pub history_limit: u64,
    pub heartbeat_interval_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("HUDDLE"),
            )
            .set_default("database.url", "mongodb://localhost:27017")?
            .set_default("database.name", "huddle")?
            .set_default("store.backend", "mongo")?
            .set_default("store.event_buffer", 256)?
            .set_default("chat.preview_max_chars", 120)?
            .set_default("chat.max_message_chars", 4000)?
            .set_default("chat.history_limit", 500)?
            .set_default("chat.heartbeat_interval_secs", 120)?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
