use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_INPUT_PATH: &str = "storage/key_value_stores/default/INPUT.json";
const DEFAULT_DATASET_PATH: &str = "storage/datasets/default.jsonl";
const DEFAULT_SEARCH_URL: &str = "https://www.google.com/maps/search/{query}";
const DEFAULT_PLACE_GLOB: &str = "https://www.google.com/maps/place/*";

// Count, scroll and extent evaluations issued per scroll step.
const SCROLL_EVAL_ALLOWANCE: Duration = Duration::from_millis(500);
// Link reads and the queue push after scrolling ends.
const HANDLER_HEADROOM: Duration = Duration::from_secs(10);
const MIN_HANDLER_TIMEOUT: Duration = Duration::from_secs(20);

/// Run input, as supplied by the caller of the actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlInput {
    pub search_query: String,
    pub max_results: usize,
}

impl CrawlInput {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_query.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "searchQuery".into(),
                value: self.search_query.clone(),
            });
        }
        if self.max_results == 0 {
            return Err(ConfigError::Invalid {
                key: "maxResults".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialInput {
    search_query: Option<String>,
    max_results: Option<usize>,
}

/// Speed/thoroughness trade-off presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrawlProfile {
    Fast,
    #[default]
    Balanced,
    Thorough,
}

impl FromStr for CrawlProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(CrawlProfile::Fast),
            "balanced" => Ok(CrawlProfile::Balanced),
            "thorough" => Ok(CrawlProfile::Thorough),
            _ => Err(ConfigError::Invalid {
                key: "CRAWL_PROFILE".into(),
                value: s.to_string(),
            }),
        }
    }
}

impl CrawlProfile {
    fn max_concurrency(self) -> usize {
        match self {
            CrawlProfile::Fast | CrawlProfile::Balanced => 10,
            CrawlProfile::Thorough => 3,
        }
    }

    fn max_scrolls(self) -> usize {
        match self {
            CrawlProfile::Fast => 5,
            CrawlProfile::Balanced => 8,
            CrawlProfile::Thorough => 15,
        }
    }

    fn settle(self) -> Duration {
        match self {
            CrawlProfile::Fast | CrawlProfile::Balanced => Duration::from_millis(300),
            CrawlProfile::Thorough => Duration::from_millis(1000),
        }
    }
}

/// CSS selectors for the listing pages.
///
/// These track a third-party page layout and change without notice, so they
/// are versioned and loadable from a file. Any key missing from the file
/// keeps its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    pub version: String,
    pub place_link: String,
    pub feed: String,
    pub title: String,
    pub rating: String,
    pub reviews: String,
    pub address: String,
    pub phone_button: String,
    /// Text node nested inside `phone_button`.
    pub phone_text: String,
    pub website: String,
    /// Attribute read from `website`; the visible text is the fallback.
    pub website_attribute: String,
    pub category: String,
    /// Ordinal among `category` matches. Layout heuristic, best effort only.
    pub category_index: usize,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            version: "maps-2024.1".into(),
            place_link: r#"a[href*="/maps/place/"]"#.into(),
            feed: r#"div[role="feed"]"#.into(),
            title: "h1".into(),
            rating: r#"span[aria-label*="stars"]"#.into(),
            reviews: r#"[aria-label*="reviews"]"#.into(),
            address: r#"[data-item-id="address"]"#.into(),
            phone_button: r#"button[data-item-id^="phone:tel"]"#.into(),
            phone_text: "div.Io6YTe".into(),
            website: r#"a[data-item-id="authority"]"#.into(),
            website_attribute: "href".into(),
            category: "[jslog]".into(),
            category_index: 3,
        }
    }
}

impl SelectorSet {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub anchor_timeout: Duration,
    pub max_scrolls: usize,
    pub scroll_step: i64,
    pub settle: Duration,
    /// Consecutive no-growth observations that end the scroll loop.
    pub stability_threshold: usize,
    pub link_batch_size: usize,
    /// Harvested hrefs must match this glob when set.
    pub link_glob: Option<String>,
}

impl SearchSettings {
    /// Worst-case time spent waiting and scrolling on one search page.
    pub fn budget(&self) -> Duration {
        let steps = u32::try_from(self.max_scrolls).unwrap_or(u32::MAX);
        self.anchor_timeout
            .saturating_add((self.settle + SCROLL_EVAL_ALLOWANCE).saturating_mul(steps))
    }

    /// Handler timeout that lets a full scroll pass finish and harvest.
    pub fn handler_timeout(&self) -> Duration {
        self.budget()
            .saturating_add(HANDLER_HEADROOM)
            .max(MIN_HANDLER_TIMEOUT)
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        let profile = CrawlProfile::default();
        Self {
            anchor_timeout: Duration::from_millis(8000),
            max_scrolls: profile.max_scrolls(),
            scroll_step: 3500,
            settle: profile.settle(),
            stability_threshold: 1,
            link_batch_size: 20,
            link_glob: Some(DEFAULT_PLACE_GLOB.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetailSettings {
    pub heading_timeout: Duration,
    pub field_timeout: Duration,
    /// Fan the field reads out concurrently instead of one after another.
    pub parallel_fields: bool,
}

impl Default for DetailSettings {
    fn default() -> Self {
        Self {
            heading_timeout: Duration::from_millis(4000),
            field_timeout: Duration::from_millis(2000),
            parallel_fields: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub window_size: (u32, u32),
    /// CDP resource types (`Image`, `Font`, ...) failed before they load.
    pub blocked_resource_types: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1920, 1080),
            blocked_resource_types: [
                "Image",
                "Stylesheet",
                "Font",
                "Media",
                "Ping",
                "Manifest",
                "WebSocket",
                "Other",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    Memory,
    Redis { url: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkBackend {
    JsonLines { path: String },
    Postgres { url: String },
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub input: CrawlInput,
    pub profile: CrawlProfile,
    pub search_url_template: String,
    pub max_concurrency: usize,
    pub navigation_timeout: Duration,
    pub request_handler_timeout: Duration,
    pub poll_interval: Duration,
    pub search: SearchSettings,
    pub detail: DetailSettings,
    pub browser: BrowserSettings,
    pub selectors: SelectorSet,
    pub queue: QueueBackend,
    pub sink: SinkBackend,
}

impl CrawlerConfig {
    /// Defaults for `input` under the balanced profile.
    pub fn new(input: CrawlInput) -> Self {
        let profile = CrawlProfile::default();
        let search = SearchSettings::default();
        Self {
            input,
            profile,
            search_url_template: DEFAULT_SEARCH_URL.into(),
            max_concurrency: profile.max_concurrency(),
            navigation_timeout: Duration::from_secs(15),
            request_handler_timeout: search.handler_timeout(),
            poll_interval: Duration::from_millis(200),
            search,
            detail: DetailSettings::default(),
            browser: BrowserSettings::default(),
            selectors: SelectorSet::default(),
            queue: QueueBackend::Memory,
            sink: SinkBackend::JsonLines {
                path: DEFAULT_DATASET_PATH.into(),
            },
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a key lookup (environment-shaped).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let input = load_input(&lookup)?;
        let profile = match lookup("CRAWL_PROFILE") {
            Some(raw) => raw.parse()?,
            None => CrawlProfile::default(),
        };

        let mut config = Self::new(input);
        config.profile = profile;
        config.max_concurrency = parse_or(&lookup, "MAX_CONCURRENCY", profile.max_concurrency())?;
        if config.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENCY".into(),
                value: "0".into(),
            });
        }
        if let Some(template) = lookup("SEARCH_URL_TEMPLATE") {
            config.search_url_template = template;
        }
        config.navigation_timeout =
            Duration::from_secs(parse_or(&lookup, "NAVIGATION_TIMEOUT_SECS", 15)?);
        config.poll_interval = Duration::from_millis(parse_or(&lookup, "QUEUE_POLL_MS", 200)?);

        config.search = SearchSettings {
            anchor_timeout: Duration::from_millis(parse_or(&lookup, "SEARCH_ANCHOR_TIMEOUT_MS", 8000)?),
            max_scrolls: parse_or(&lookup, "MAX_SCROLLS", profile.max_scrolls())?,
            scroll_step: parse_or(&lookup, "SCROLL_STEP_PX", 3500)?,
            settle: Duration::from_millis(parse_or(
                &lookup,
                "SCROLL_SETTLE_MS",
                profile.settle().as_millis() as u64,
            )?),
            stability_threshold: parse_or(&lookup, "STABILITY_THRESHOLD", 1)?,
            link_batch_size: parse_or(&lookup, "LINK_BATCH_SIZE", 20)?,
            link_glob: match lookup("PLACE_LINK_GLOB") {
                Some(glob) if glob.trim().is_empty() => None,
                Some(glob) => Some(glob),
                None => Some(DEFAULT_PLACE_GLOB.into()),
            },
        };
        config.request_handler_timeout = match lookup("REQUEST_HANDLER_TIMEOUT_SECS") {
            Some(_) => Duration::from_secs(parse_or(&lookup, "REQUEST_HANDLER_TIMEOUT_SECS", 0)?),
            None => config.search.handler_timeout(),
        };

        config.detail = DetailSettings {
            heading_timeout: Duration::from_millis(parse_or(&lookup, "DETAIL_HEADING_TIMEOUT_MS", 4000)?),
            field_timeout: Duration::from_millis(parse_or(&lookup, "FIELD_TIMEOUT_MS", 2000)?),
            parallel_fields: parse_or(&lookup, "PARALLEL_FIELDS", true)?,
        };

        config.browser.headless = parse_or(&lookup, "HEADLESS", true)?;
        if let Some(types) = lookup("BLOCKED_RESOURCE_TYPES") {
            config.browser.blocked_resource_types = types
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        if let Some(path) = lookup("SELECTORS_PATH") {
            config.selectors = SelectorSet::load(Path::new(&path))?;
        }

        config.queue = match lookup("QUEUE_BACKEND").as_deref() {
            None | Some("memory") => QueueBackend::Memory,
            Some("redis") => QueueBackend::Redis {
                url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
                key: lookup("REDIS_QUEUE_KEY").unwrap_or_else(|| "crawl_queue".to_string()),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "QUEUE_BACKEND".into(),
                    value: other.to_string(),
                })
            }
        };

        config.sink = match lookup("SINK_BACKEND").as_deref() {
            None | Some("jsonl") => SinkBackend::JsonLines {
                path: lookup("DATASET_PATH").unwrap_or_else(|| DEFAULT_DATASET_PATH.to_string()),
            },
            Some("postgres") => SinkBackend::Postgres {
                url: lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SINK_BACKEND".into(),
                    value: other.to_string(),
                })
            }
        };

        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn load_input<F>(lookup: &F) -> Result<CrawlInput, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = lookup("CRAWL_INPUT");
    let path = explicit.clone().unwrap_or_else(|| DEFAULT_INPUT_PATH.to_string());

    let mut partial = if explicit.is_some() || Path::new(&path).exists() {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str::<PartialInput>(&raw).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?
    } else {
        PartialInput::default()
    };

    if let Some(query) = lookup("SEARCH_QUERY") {
        partial.search_query = Some(query);
    }
    if let Some(max) = lookup("MAX_RESULTS") {
        partial.max_results = Some(max.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "MAX_RESULTS".into(),
            value: max,
        })?);
    }

    let input = CrawlInput {
        search_query: partial.search_query.ok_or(ConfigError::Missing("searchQuery"))?,
        max_results: partial.max_results.ok_or(ConfigError::Missing("maxResults"))?,
    };
    input.validate()?;
    Ok(input)
}
