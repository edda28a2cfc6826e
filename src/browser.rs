use async_trait::async_trait;
use headless_chrome::browser::tab::RequestPausedDecision;
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FailRequest, RequestPattern, RequestStage};
use headless_chrome::protocol::cdp::Network::ErrorReason;
use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::BrowserSettings;
use crate::error::PageError;
use crate::page::{Page, PageOpener};

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/123.0.0.0 Safari/537.36",
    ]
});

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

// Low-footprint flags; pages are read through the DOM, never rendered for humans.
const CHROME_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-setuid-sandbox",
    "--no-sandbox",
    "--no-zygote",
    "--disable-extensions",
    "--blink-settings=imagesEnabled=false",
    "--disable-default-apps",
    "--disable-plugins",
    "--disable-sync",
];

fn browser_error(e: impl std::fmt::Display) -> PageError {
    PageError::Browser(e.to_string())
}

/// Only an expired wait is a timeout; a dead tab or lost connection is not.
fn wait_error(selector: String, e: anyhow::Error) -> PageError {
    if e.downcast_ref::<headless_chrome::util::Timeout>().is_some() {
        PageError::Timeout { selector }
    } else {
        browser_error(e)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, PageError>
where
    F: FnOnce() -> Result<T, PageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(browser_error)?
}

/// Fail requests for resource types the crawl never reads.
fn install_resource_blocking(tab: &Tab, blocked: Arc<HashSet<String>>) -> anyhow::Result<()> {
    let patterns = [RequestPattern {
        url_pattern: Some("*".to_string()),
        resource_Type: None,
        request_stage: Some(RequestStage::Request),
    }];
    tab.enable_fetch(Some(&patterns), None)?;
    tab.enable_request_interception(Arc::new(
        move |_transport: Arc<Transport>, _session: SessionId, intercepted: RequestPausedEvent| {
            let kind = serde_json::to_value(&intercepted.params.resource_Type)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.to_ascii_lowercase()))
                .unwrap_or_default();
            if blocked.contains(&kind) {
                RequestPausedDecision::Fail(FailRequest {
                    request_id: intercepted.params.request_id,
                    error_reason: ErrorReason::BlockedByClient,
                })
            } else {
                RequestPausedDecision::Continue(None)
            }
        },
    ))?;
    Ok(())
}

/// One headless Chrome process; every opened page is a fresh tab.
pub struct ChromeOpener {
    browser: Arc<Browser>,
    navigation_timeout: Duration,
    blocked: Arc<HashSet<String>>,
}

impl ChromeOpener {
    pub async fn launch(
        settings: &BrowserSettings,
        navigation_timeout: Duration,
    ) -> Result<Self, PageError> {
        let headless = settings.headless;
        let window_size = settings.window_size;
        let browser = blocking(move || {
            Browser::new(LaunchOptions {
                headless,
                window_size: Some(window_size),
                args: CHROME_ARGS.iter().map(OsStr::new).collect(),
                idle_browser_timeout: Duration::from_secs(600),
                ..Default::default()
            })
            .map_err(browser_error)
        })
        .await?;
        info!(headless, "chrome launched");

        let blocked = settings
            .blocked_resource_types
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();

        Ok(Self {
            browser: Arc::new(browser),
            navigation_timeout,
            blocked: Arc::new(blocked),
        })
    }
}

#[async_trait]
impl PageOpener for ChromeOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn Page>, PageError> {
        let browser = self.browser.clone();
        let blocked = self.blocked.clone();
        let timeout = self.navigation_timeout;
        let target = url.to_string();

        let tab = blocking(move || {
            let tab = browser.new_tab().map_err(browser_error)?;
            tab.set_default_timeout(timeout);

            let user_agent = USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(DEFAULT_USER_AGENT);
            let prepared = tab
                .set_user_agent(user_agent, Some("en-US,en;q=0.9"), None)
                .and_then(|_| {
                    if blocked.is_empty() {
                        Ok(())
                    } else {
                        install_resource_blocking(&tab, blocked)
                    }
                })
                .and_then(|_| tab.navigate_to(&target).map(|_| ()))
                .and_then(|_| tab.wait_until_navigated().map(|_| ()));

            if let Err(e) = prepared {
                let _ = tab.close(false);
                return Err(browser_error(e));
            }
            Ok(tab)
        })
        .await?;

        debug!(url, "tab navigated");
        Ok(Box::new(ChromePage { tab }))
    }
}

/// A navigated Chrome tab. DOM reads go through `Runtime.evaluate`.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn eval(&self, script: String) -> Result<serde_json::Value, PageError> {
        let tab = self.tab.clone();
        blocking(move || {
            tab.evaluate(&script, false)
                .map(|remote| remote.value.unwrap_or(serde_json::Value::Null))
                .map_err(|e| PageError::Evaluation(e.to_string()))
        })
        .await
    }

    async fn eval_string(&self, script: String) -> Result<Option<String>, PageError> {
        match self.eval(script).await? {
            serde_json::Value::String(s) => Ok(Some(s)),
            serde_json::Value::Null => Ok(None),
            other => Ok(Some(other.to_string())),
        }
    }
}

fn js_str(value: &str) -> String {
    // A JSON string literal is a valid JS string literal.
    serde_json::Value::String(value.to_string()).to_string()
}

#[async_trait]
impl Page for ChromePage {
    fn url(&self) -> String {
        self.tab.get_url()
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), PageError> {
        let tab = self.tab.clone();
        let selector = selector.to_string();
        blocking(move || {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map(|_| ())
                .map_err(|e| wait_error(selector, e))
        })
        .await
    }

    async fn count(&self, selector: &str) -> Result<usize, PageError> {
        let script = format!("document.querySelectorAll({}).length", js_str(selector));
        let value = self.eval(script).await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| PageError::Evaluation(format!("unexpected count {}", value)))
    }

    async fn text_content(&self, selector: &str, index: usize) -> Result<Option<String>, PageError> {
        let script = format!(
            "(() => {{ const el = document.querySelectorAll({})[{}]; return el ? el.textContent : null; }})()",
            js_str(selector),
            index
        );
        self.eval_string(script).await
    }

    async fn attribute(
        &self,
        selector: &str,
        index: usize,
        name: &str,
    ) -> Result<Option<String>, PageError> {
        let script = format!(
            "(() => {{ const el = document.querySelectorAll({})[{}]; return el ? el.getAttribute({}) : null; }})()",
            js_str(selector),
            index,
            js_str(name)
        );
        self.eval_string(script).await
    }

    async fn scroll_by(&self, selector: &str, dy: i64) -> Result<bool, PageError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.scrollBy(0, {}); return true; }})()",
            js_str(selector),
            dy
        );
        Ok(self.eval(script).await?.as_bool().unwrap_or(false))
    }

    async fn scroll_extent(&self, selector: &str) -> Result<Option<u64>, PageError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.scrollHeight : null; }})()",
            js_str(selector)
        );
        Ok(self.eval(script).await?.as_u64())
    }

    async fn close(&self) {
        let tab = self.tab.clone();
        let _ = blocking(move || tab.close(false).map(|_| ()).map_err(browser_error)).await;
    }
}
