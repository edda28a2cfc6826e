use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::PageError;

/// DOM primitives of one loaded page session.
///
/// Element lookups take a CSS selector plus a zero-based index among the
/// matches, so `first()` is index 0 and ordinal picks are explicit.
#[async_trait]
pub trait Page: Send + Sync {
    /// URL the session ended up on.
    fn url(&self) -> String;

    /// Wait until `selector` matches at least one attached element.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), PageError>;

    async fn count(&self, selector: &str) -> Result<usize, PageError>;

    /// `textContent` of the `index`-th match, `None` if there is no such element.
    async fn text_content(&self, selector: &str, index: usize) -> Result<Option<String>, PageError>;

    async fn attribute(
        &self,
        selector: &str,
        index: usize,
        name: &str,
    ) -> Result<Option<String>, PageError>;

    /// Scroll the first match of `selector` vertically. False if it is absent.
    async fn scroll_by(&self, selector: &str, dy: i64) -> Result<bool, PageError>;

    /// Scrollable height of the first match of `selector`.
    async fn scroll_extent(&self, selector: &str) -> Result<Option<u64>, PageError>;

    /// Give lazily loaded content time to render.
    async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Release the session. Called once the handler is done with the page.
    async fn close(&self) {}
}

/// Opens a navigated page session for a URL.
#[async_trait]
pub trait PageOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn Page>, PageError>;
}

fn parse_selector(selector: &str) -> Result<Selector, PageError> {
    Selector::parse(selector).map_err(|_| PageError::InvalidSelector(selector.to_string()))
}

/// A static page snapshot backed by `scraper`.
///
/// A snapshot can carry several stages of the same document; every
/// successful `scroll_by` moves to the next stage, which is how a feed that
/// lazily appends results is replayed. The last stage repeats once reached.
/// Extent is the byte length of the container's inner HTML.
#[derive(Debug)]
pub struct HtmlPage {
    url: String,
    stages: Vec<String>,
    stage: AtomicUsize,
    scrolls: AtomicUsize,
}

impl HtmlPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self::with_stages(url, vec![html.into()])
    }

    pub fn with_stages(url: impl Into<String>, stages: Vec<String>) -> Self {
        let stages = if stages.is_empty() {
            vec![String::new()]
        } else {
            stages
        };
        Self {
            url: url.into(),
            stages,
            stage: AtomicUsize::new(0),
            scrolls: AtomicUsize::new(0),
        }
    }

    /// Scroll steps issued against this page so far.
    pub fn scroll_count(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }

    fn with_matches<T>(
        &self,
        selector: &str,
        f: impl FnOnce(Vec<ElementRef<'_>>) -> T,
    ) -> Result<T, PageError> {
        let selector = parse_selector(selector)?;
        let stage = self.stage.load(Ordering::SeqCst).min(self.stages.len() - 1);
        let document = Html::parse_document(&self.stages[stage]);
        let matches: Vec<ElementRef<'_>> = document.select(&selector).collect();
        Ok(f(matches))
    }
}

#[async_trait]
impl Page for HtmlPage {
    fn url(&self) -> String {
        self.url.clone()
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<(), PageError> {
        let found = self.with_matches(selector, |m| !m.is_empty())?;
        if found {
            Ok(())
        } else {
            Err(PageError::Timeout {
                selector: selector.to_string(),
            })
        }
    }

    async fn count(&self, selector: &str) -> Result<usize, PageError> {
        self.with_matches(selector, |m| m.len())
    }

    async fn text_content(&self, selector: &str, index: usize) -> Result<Option<String>, PageError> {
        self.with_matches(selector, |m| {
            m.get(index).map(|el| el.text().collect::<String>())
        })
    }

    async fn attribute(
        &self,
        selector: &str,
        index: usize,
        name: &str,
    ) -> Result<Option<String>, PageError> {
        self.with_matches(selector, |m| {
            m.get(index)
                .and_then(|el| el.value().attr(name).map(|s| s.to_string()))
        })
    }

    async fn scroll_by(&self, selector: &str, _dy: i64) -> Result<bool, PageError> {
        let present = self.with_matches(selector, |m| !m.is_empty())?;
        if present {
            self.scrolls.fetch_add(1, Ordering::SeqCst);
            let last = self.stages.len() - 1;
            let _ = self
                .stage
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| Some((s + 1).min(last)));
        }
        Ok(present)
    }

    async fn scroll_extent(&self, selector: &str) -> Result<Option<u64>, PageError> {
        self.with_matches(selector, |m| m.first().map(|el| el.inner_html().len() as u64))
    }

    async fn settle(&self, _duration: Duration) {}
}

/// Serves [`HtmlPage`] snapshots by URL; a fresh page on every open.
#[derive(Debug, Default)]
pub struct SnapshotOpener {
    pages: HashMap<String, Vec<String>>,
}

impl SnapshotOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), vec![html.into()]);
        self
    }

    pub fn staged_page(mut self, url: impl Into<String>, stages: Vec<String>) -> Self {
        self.pages.insert(url.into(), stages);
        self
    }
}

#[async_trait]
impl PageOpener for SnapshotOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn Page>, PageError> {
        match self.pages.get(url) {
            Some(stages) => Ok(Box::new(HtmlPage::with_stages(url, stages.clone()))),
            None => Err(PageError::Browser(format!("no snapshot for {}", url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"
        <html><body>
          <h1> Blue Bottle Coffee </h1>
          <a class="x" href="/one">One</a>
          <a class="x" href="/two" aria-label="second">Two</a>
          <div role="feed"><p>a</p></div>
        </body></html>
    "#;

    #[tokio::test]
    async fn reads_text_and_attributes_by_index() {
        let page = HtmlPage::new("https://x.test/", HTML);
        assert_eq!(page.count("a.x").await.unwrap(), 2);
        assert_eq!(
            page.text_content("h1", 0).await.unwrap().as_deref(),
            Some(" Blue Bottle Coffee ")
        );
        assert_eq!(
            page.attribute("a.x", 1, "aria-label").await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(page.attribute("a.x", 5, "href").await.unwrap(), None);
    }

    #[tokio::test]
    async fn wait_for_missing_selector_times_out() {
        let page = HtmlPage::new("https://x.test/", HTML);
        assert!(page.wait_for("h1", Duration::from_millis(10)).await.is_ok());
        let err = page.wait_for("h2", Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, PageError::Timeout { .. }));
    }

    #[tokio::test]
    async fn invalid_selector_is_reported() {
        let page = HtmlPage::new("https://x.test/", HTML);
        let err = page.count("a[[").await.unwrap_err();
        assert!(matches!(err, PageError::InvalidSelector(_)));
    }

    #[tokio::test]
    async fn scrolling_advances_stages() {
        let page = HtmlPage::with_stages(
            "https://x.test/",
            vec![
                r#"<div role="feed"><a class="x">1</a></div>"#.to_string(),
                r#"<div role="feed"><a class="x">1</a><a class="x">2</a></div>"#.to_string(),
            ],
        );
        let before = page.scroll_extent("div[role=\"feed\"]").await.unwrap().unwrap();
        assert!(page.scroll_by("div[role=\"feed\"]", 100).await.unwrap());
        let after = page.scroll_extent("div[role=\"feed\"]").await.unwrap().unwrap();
        assert!(after > before);
        assert_eq!(page.count("a.x").await.unwrap(), 2);

        assert!(!page.scroll_by("div.missing", 100).await.unwrap());
        assert_eq!(page.scroll_count(), 1);
    }
}
