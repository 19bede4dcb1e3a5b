//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::TrackedEntity;
use crate::pipeline::RetryPolicy;
use crate::services::{KNOWN_SOURCES, SOURCE_LIVE};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// How per-source results are combined
    #[serde(default)]
    pub merge: MergeStrategy,

    /// HTTP and source settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry/backoff around each fetch
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Change detection strategy
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Chat endpoint
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Message rendering and pacing
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// File locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Log settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Accounts or rooms to watch, scanned in this order
    #[serde(default)]
    pub entities: Vec<TrackedEntity>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using the given variable lookup.
    ///
    /// Recognized: `TG_BOT_TOKEN`, `TG_CHAT_ID`, `BILI_UIDS`, `NOTIFIER_STATE_FILE`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TG_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = lookup("TG_CHAT_ID") {
            self.telegram.chat_id = chat_id;
        }
        if let Some(uids) = lookup("BILI_UIDS") {
            self.entities = uids
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(TrackedEntity::new)
                .collect();
        }
        if let Some(path) = lookup("NOTIFIER_STATE_FILE") {
            self.paths.state_file = PathBuf::from(path);
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(AppError::validation("telegram.bot_token is empty"));
        }
        if self.telegram.chat_id.trim().is_empty() {
            return Err(AppError::validation("telegram.chat_id is empty"));
        }
        if self.entities.is_empty() {
            return Err(AppError::validation("no entities configured"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::validation("retry.max_attempts must be > 0"));
        }
        if self.detector.history_cap == 0 {
            return Err(AppError::validation("detector.history_cap must be > 0"));
        }
        if self.detector.notify_cap == 0 {
            return Err(AppError::validation("detector.notify_cap must be > 0"));
        }
        if self.fetch.sources.is_empty() {
            return Err(AppError::validation("fetch.sources is empty"));
        }

        let all_sources = self
            .fetch
            .sources
            .iter()
            .chain(self.entities.iter().flat_map(|e| e.sources.iter()));
        for source in all_sources {
            if !KNOWN_SOURCES.contains(&source.as_str()) {
                return Err(AppError::validation(format!("unknown source '{source}'")));
            }
        }

        let wants_status = self.detector.kind == DetectorKind::LiveStatus;
        for source in &self.fetch.sources {
            if (source == SOURCE_LIVE) != wants_status {
                return Err(AppError::validation(format!(
                    "source '{source}' cannot be used with the {:?} detector",
                    self.detector.kind
                )));
            }
        }

        for entity in &self.entities {
            if entity.id.trim().is_empty() {
                return Err(AppError::validation("entity with empty id"));
            }
        }

        Ok(())
    }
}

/// How results from several sources become one list per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// First source (by priority) with a non-empty result wins
    #[default]
    StrictFallback,
    /// Every source is asked; results are concatenated and deduplicated
    MergeAll,
}

/// Which change detector a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Bounded set of notified ids
    #[default]
    SeenSet,
    /// Single most-recent id
    LatestId,
    /// Edge-triggered live/offline status
    LiveStatus,
}

/// HTTP and source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User agent string for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Referer header sent with every request
    #[serde(default = "defaults::referer")]
    pub referer: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::fetch_timeout")]
    pub timeout_secs: u64,

    /// Enabled sources, highest priority first
    #[serde(default = "defaults::sources")]
    pub sources: Vec<String>,

    /// Dynamic feed endpoint, `{id}` is replaced by the entity id
    #[serde(default = "defaults::dynamic_url")]
    pub dynamic_url: String,

    /// RSSHub fallback endpoint
    #[serde(default = "defaults::rsshub_url")]
    pub rsshub_url: String,

    /// Live room info endpoint
    #[serde(default = "defaults::live_url")]
    pub live_url: String,

    /// Number of RSS entries considered per fetch
    #[serde(default = "defaults::rss_item_limit")]
    pub rss_item_limit: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            referer: defaults::referer(),
            timeout_secs: defaults::fetch_timeout(),
            sources: defaults::sources(),
            dynamic_url: defaults::dynamic_url(),
            rsshub_url: defaults::rsshub_url(),
            live_url: defaults::live_url(),
            rss_item_limit: defaults::rss_item_limit(),
        }
    }
}

/// Change detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub kind: DetectorKind,

    /// Maximum ids remembered per entity (seen-set detector)
    #[serde(default = "defaults::history_cap")]
    pub history_cap: usize,

    /// Maximum new items announced per entity per run
    #[serde(default = "defaults::notify_cap")]
    pub notify_cap: usize,

    /// Record the current items without announcing them the first time an entity is seen
    #[serde(default = "defaults::seed_silently")]
    pub seed_silently: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::default(),
            history_cap: defaults::history_cap(),
            notify_cap: defaults::notify_cap(),
            seed_silently: defaults::seed_silently(),
        }
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token (usually supplied through `TG_BOT_TOKEN`)
    #[serde(default)]
    pub bot_token: String,

    /// Target chat id (usually supplied through `TG_CHAT_ID`)
    #[serde(default)]
    pub chat_id: String,

    /// Parse mode for message formatting
    #[serde(default = "defaults::parse_mode")]
    pub parse_mode: String,

    /// Suppress link previews
    #[serde(default)]
    pub disable_preview: bool,

    /// API base URL
    #[serde(default = "defaults::telegram_api")]
    pub api_base: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::telegram_timeout")]
    pub timeout_secs: u64,
}

impl TelegramConfig {
    pub fn is_html(&self) -> bool {
        self.parse_mode.eq_ignore_ascii_case("html")
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            parse_mode: defaults::parse_mode(),
            disable_preview: false,
            api_base: defaults::telegram_api(),
            timeout_secs: defaults::telegram_timeout(),
        }
    }
}

/// Message rendering and pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Minimum delay between two sends in milliseconds
    #[serde(default = "defaults::send_delay")]
    pub send_delay_ms: u64,

    /// Titles longer than this many grapheme clusters are cut
    #[serde(default = "defaults::max_title_graphemes")]
    pub max_title_graphemes: usize,

    #[serde(default)]
    pub templates: Templates,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: defaults::send_delay(),
            max_title_graphemes: defaults::max_title_graphemes(),
            templates: Templates::default(),
        }
    }
}

/// Message templates.
///
/// Placeholders: `{entity}`, `{name}`, `{title}`, `{link}`, `{source}`, `{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Templates {
    #[serde(default = "defaults::tpl_new_item")]
    pub new_item: String,

    #[serde(default = "defaults::tpl_went_live")]
    pub went_live: String,

    #[serde(default = "defaults::tpl_went_offline")]
    pub went_offline: String,

    /// Appended when the item has a link
    #[serde(default = "defaults::tpl_link")]
    pub link: String,

    #[serde(default = "defaults::tpl_self_check")]
    pub self_check: String,

    /// Used in place of an empty title
    #[serde(default = "defaults::tpl_empty_title")]
    pub empty_title: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            new_item: defaults::tpl_new_item(),
            went_live: defaults::tpl_went_live(),
            went_offline: defaults::tpl_went_offline(),
            link: defaults::tpl_link(),
            self_check: defaults::tpl_self_check(),
            empty_title: defaults::tpl_empty_title(),
        }
    }
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "defaults::state_file")]
    pub state_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: defaults::state_file(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

impl LoggingConfig {
    /// Parsed `level`; `None` for an unknown level name.
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        self.level.trim().parse().ok()
    }
}

mod defaults {
    use std::path::PathBuf;

    use crate::services::{SOURCE_DYNAMIC, SOURCE_RSSHUB};

    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Actions; BiliWatch/1.1)".into()
    }
    pub fn referer() -> String {
        "https://t.bilibili.com/".into()
    }
    pub fn fetch_timeout() -> u64 {
        15
    }
    pub fn sources() -> Vec<String> {
        vec![SOURCE_DYNAMIC.into(), SOURCE_RSSHUB.into()]
    }
    pub fn dynamic_url() -> String {
        "https://api.bilibili.com/x/polymer/web-dynamic/v1/feed/space?host_mid={id}".into()
    }
    pub fn rsshub_url() -> String {
        "https://rsshub.app/bilibili/user/dynamic/{id}".into()
    }
    pub fn live_url() -> String {
        "https://api.live.bilibili.com/room/v1/Room/get_info?room_id={id}".into()
    }
    pub fn rss_item_limit() -> usize {
        5
    }

    // Detector defaults
    pub fn history_cap() -> usize {
        100
    }
    pub fn notify_cap() -> usize {
        3
    }
    pub fn seed_silently() -> bool {
        true
    }

    // Telegram defaults
    pub fn parse_mode() -> String {
        "HTML".into()
    }
    pub fn telegram_api() -> String {
        "https://api.telegram.org".into()
    }
    pub fn telegram_timeout() -> u64 {
        20
    }

    // Dispatch defaults
    pub fn send_delay() -> u64 {
        500
    }
    pub fn max_title_graphemes() -> usize {
        300
    }
    pub fn tpl_new_item() -> String {
        "👀 <b>UP {name} 有新动态</b>\n📝 {title}".into()
    }
    pub fn tpl_went_live() -> String {
        "🔴 <b>{name} 开播了</b>\n📺 {title}".into()
    }
    pub fn tpl_went_offline() -> String {
        "⚫ <b>{name} 下播了</b>\n📺 {title}".into()
    }
    pub fn tpl_link() -> String {
        "\n🔗 {link}".into()
    }
    pub fn tpl_self_check() -> String {
        "🔔 Bili Notifier 自检：工作流已启动。".into()
    }
    pub fn tpl_empty_title() -> String {
        "新动态".into()
    }

    pub fn state_file() -> PathBuf {
        PathBuf::from("state.json")
    }
    pub fn log_level() -> String {
        "info".into()
    }
}
