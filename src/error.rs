use thiserror::Error;

/// Failures of a single DOM primitive on a page session.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("selector `{selector}` did not attach in time")]
    Timeout { selector: String },
    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Unavailable(e.to_string())
    }
}

impl From<sqlx::Error> for SinkError {
    fn from(e: sqlx::Error) -> Self {
        SinkError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("request codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CrawlError {
    /// The defining element of a page never attached. The page is abandoned.
    #[error("navigation timeout on {url}: `{selector}` never attached")]
    NavigationTimeout { url: String, selector: String },
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("invalid link glob: {0}")]
    LinkGlob(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value `{value}` for `{key}`")]
    Invalid { key: String, value: String },
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
