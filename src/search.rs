use futures::future::join_all;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::config::{SearchSettings, SelectorSet};
use crate::error::{CrawlError, PageError};
use crate::frontier::DedupFrontier;
use crate::model::CrawlRequest;
use crate::page::Page;

/// Shell-style URL pattern: `*` matches any run of characters, `?` exactly one.
#[derive(Debug, Clone)]
pub struct UrlGlob {
    pattern: String,
    regex: Regex,
}

impl UrlGlob {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut source = String::with_capacity(pattern.len() + 8);
        source.push('^');
        for c in pattern.chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }
        source.push('$');
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&source)?,
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStop {
    /// Enough anchors were visible before the next scroll.
    TargetReached,
    /// The feed stopped growing.
    Stable,
    /// Ran out of iterations.
    Exhausted,
    /// A page primitive failed mid-loop; whatever is loaded gets harvested.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollReport {
    pub steps: usize,
    pub stop: ScrollStop,
}

#[derive(Debug, Clone)]
pub struct Harvest {
    /// Detail requests whose URL was reserved in the frontier.
    pub requests: Vec<CrawlRequest>,
    /// Anchors present on the page after scrolling.
    pub anchors: usize,
    pub scroll: ScrollReport,
}

/// Scroll-paginates a results page and turns its listing anchors into
/// detail requests.
pub struct SearchPageController {
    selectors: Arc<SelectorSet>,
    settings: SearchSettings,
    target: usize,
    link_glob: Option<UrlGlob>,
    frontier: Arc<DedupFrontier>,
}

impl SearchPageController {
    pub fn new(
        selectors: Arc<SelectorSet>,
        settings: SearchSettings,
        target: usize,
        frontier: Arc<DedupFrontier>,
    ) -> Result<Self, regex::Error> {
        let link_glob = settings.link_glob.as_deref().map(UrlGlob::new).transpose()?;
        Ok(Self {
            selectors,
            settings,
            target,
            link_glob,
            frontier,
        })
    }

    pub async fn harvest(&self, page: &dyn Page) -> Result<Harvest, CrawlError> {
        let page_url = page.url();
        let anchor = self.selectors.place_link.as_str();

        page.wait_for(anchor, self.settings.anchor_timeout)
            .await
            .map_err(|e| match e {
                PageError::Timeout { selector } => CrawlError::NavigationTimeout {
                    url: page_url.clone(),
                    selector,
                },
                other => CrawlError::Page(other),
            })?;

        let scroll = self.scroll_feed(page).await;
        debug!(url = %page_url, steps = scroll.steps, stop = ?scroll.stop, "scrolling finished");

        // Every anchor is read; a listing often carries more than one.
        let anchors = page.count(anchor).await?;
        let hrefs = self.collect_links(page, anchors).await;

        let base = Url::parse(&page_url).ok();
        let mut seen = HashSet::new();
        let candidates: Vec<String> = hrefs
            .into_iter()
            .flatten()
            .filter_map(|href| resolve(base.as_ref(), &href))
            .filter(|url| self.link_glob.as_ref().map_or(true, |g| g.matches(url)))
            .filter(|url| seen.insert(url.clone()))
            .take(self.frontier.remaining())
            .collect();

        let requests: Vec<CrawlRequest> = candidates
            .into_iter()
            .filter(|url| self.frontier.try_reserve(url))
            .map(CrawlRequest::detail)
            .collect();

        info!(
            url = %page_url,
            anchors,
            dispatched = requests.len(),
            reserved = self.frontier.reserved(),
            "search page harvested"
        );

        Ok(Harvest {
            requests,
            anchors,
            scroll,
        })
    }

    /// Scroll the feed until enough anchors are visible or it stops growing.
    pub async fn scroll_feed(&self, page: &dyn Page) -> ScrollReport {
        let mut steps = 0;
        match self.scroll_loop(page, &mut steps).await {
            Ok(stop) => ScrollReport { steps, stop },
            Err(e) => {
                debug!(error = %e, "scroll loop interrupted");
                ScrollReport {
                    steps,
                    stop: ScrollStop::Interrupted,
                }
            }
        }
    }

    async fn scroll_loop(&self, page: &dyn Page, steps: &mut usize) -> Result<ScrollStop, PageError> {
        let feed = self.selectors.feed.as_str();
        let threshold = self.settings.stability_threshold.max(1);
        let mut last_extent = 0u64;
        let mut stable = 0;

        for _ in 0..self.settings.max_scrolls {
            if page.count(&self.selectors.place_link).await? >= self.target {
                return Ok(ScrollStop::TargetReached);
            }

            page.scroll_by(feed, self.settings.scroll_step).await?;
            *steps += 1;
            page.settle(self.settings.settle).await;

            // An absent container measures as zero.
            let extent = page.scroll_extent(feed).await?.unwrap_or(0);
            if extent == last_extent {
                stable += 1;
                if stable >= threshold {
                    return Ok(ScrollStop::Stable);
                }
            } else {
                stable = 0;
            }
            last_extent = extent;
        }

        Ok(ScrollStop::Exhausted)
    }

    /// Read `href` of the first `limit` anchors, batch by batch.
    async fn collect_links(&self, page: &dyn Page, limit: usize) -> Vec<Option<String>> {
        let anchor = self.selectors.place_link.as_str();
        let batch = self.settings.link_batch_size.max(1);
        let mut links = Vec::with_capacity(limit);

        for start in (0..limit).step_by(batch) {
            let end = (start + batch).min(limit);
            let reads = (start..end).map(|i| page.attribute(anchor, i, "href"));
            links.extend(join_all(reads).await.into_iter().map(|r| r.ok().flatten()));
        }

        links
    }
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let resolved = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    Some(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::HtmlPage;
    use std::time::Duration;

    const SEARCH_URL: &str = "https://www.google.com/maps/search/coffee";

    fn feed_html(count: usize) -> String {
        let anchors: String = (0..count)
            .map(|i| format!(r#"<a href="https://www.google.com/maps/place/shop-{i}">Shop {i}</a>"#))
            .collect();
        format!(r#"<html><body><div role="feed">{anchors}</div></body></html>"#)
    }

    fn controller(target: usize, max_scrolls: usize, frontier: Arc<DedupFrontier>) -> SearchPageController {
        let settings = SearchSettings {
            max_scrolls,
            settle: Duration::ZERO,
            ..SearchSettings::default()
        };
        SearchPageController::new(Arc::new(SelectorSet::default()), settings, target, frontier).unwrap()
    }

    #[test]
    fn glob_matches_place_urls_only() {
        let glob = UrlGlob::new("https://www.google.com/maps/place/*").unwrap();
        assert!(glob.matches("https://www.google.com/maps/place/Blue+Bottle/@1,2"));
        assert!(!glob.matches("https://www.google.com/maps/search/coffee"));
        assert!(!glob.matches("https://wwwXgoogle.com/maps/place/x"));

        let glob = UrlGlob::new("https://x.test/p?").unwrap();
        assert!(glob.matches("https://x.test/p1"));
        assert!(!glob.matches("https://x.test/p12"));
    }

    #[tokio::test]
    async fn caps_dispatch_at_max_results() {
        let frontier = Arc::new(DedupFrontier::new(5));
        let page = HtmlPage::new(SEARCH_URL, feed_html(12));
        let harvest = controller(5, 8, frontier.clone()).harvest(&page).await.unwrap();

        assert_eq!(harvest.requests.len(), 5);
        assert_eq!(harvest.scroll.stop, ScrollStop::TargetReached);
        assert_eq!(page.scroll_count(), 0);
        assert_eq!(frontier.reserved(), 5);
        assert_eq!(
            harvest.requests[0].url,
            "https://www.google.com/maps/place/shop-0"
        );
        for i in 5..12 {
            assert!(!frontier.try_reserve(&format!("https://www.google.com/maps/place/shop-{i}")));
        }
    }

    #[tokio::test]
    async fn stops_scrolling_once_the_feed_is_stable() {
        let frontier = Arc::new(DedupFrontier::new(100));
        let page = HtmlPage::with_stages(SEARCH_URL, vec![feed_html(3), feed_html(6), feed_html(9)]);
        let harvest = controller(100, 8, frontier).harvest(&page).await.unwrap();

        assert_eq!(harvest.scroll, ScrollReport { steps: 3, stop: ScrollStop::Stable });
        assert_eq!(page.scroll_count(), 3);
        assert_eq!(harvest.anchors, 9);
        assert_eq!(harvest.requests.len(), 9);
    }

    #[tokio::test]
    async fn higher_stability_threshold_scrolls_longer() {
        let frontier = Arc::new(DedupFrontier::new(100));
        let page = HtmlPage::with_stages(SEARCH_URL, vec![feed_html(3), feed_html(6)]);
        let settings = SearchSettings {
            max_scrolls: 8,
            settle: Duration::ZERO,
            stability_threshold: 3,
            ..SearchSettings::default()
        };
        let controller =
            SearchPageController::new(Arc::new(SelectorSet::default()), settings, 100, frontier).unwrap();
        let report = controller.scroll_feed(&page).await;
        assert_eq!(report, ScrollReport { steps: 4, stop: ScrollStop::Stable });
    }

    #[tokio::test]
    async fn missing_listings_is_a_navigation_timeout() {
        let frontier = Arc::new(DedupFrontier::new(5));
        let page = HtmlPage::new(SEARCH_URL, "<html><body><p>No results</p></body></html>");
        let err = controller(5, 8, frontier.clone()).harvest(&page).await.unwrap_err();
        assert!(matches!(err, CrawlError::NavigationTimeout { .. }));
        assert_eq!(frontier.reserved(), 0);
    }

    #[tokio::test]
    async fn skips_already_reserved_and_foreign_links() {
        let frontier = Arc::new(DedupFrontier::new(10));
        assert!(frontier.try_reserve("https://www.google.com/maps/place/shop-0"));

        let html = r#"<html><body><div role="feed">
            <a href="https://www.google.com/maps/place/shop-0">dup</a>
            <a href="/maps/place/shop-1">relative</a>
            <a href="/maps/place/shop-1">repeat</a>
            <a href="https://elsewhere.test/maps/place/shop-2">foreign</a>
        </div></body></html>"#;
        let page = HtmlPage::new(SEARCH_URL, html);
        let harvest = controller(10, 1, frontier.clone()).harvest(&page).await.unwrap();

        let urls: Vec<&str> = harvest.requests.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://www.google.com/maps/place/shop-1"]);
        assert_eq!(frontier.reserved(), 2);
    }

    #[tokio::test]
    async fn listings_with_several_anchors_still_fill_the_cap() {
        let anchors: String = (0..6)
            .map(|i| {
                format!(
                    r#"<a href="/maps/place/shop-{i}">card</a><a href="/maps/place/shop-{i}">title</a>"#
                )
            })
            .collect();
        let html = format!(r#"<html><body><div role="feed">{anchors}</div></body></html>"#);
        let frontier = Arc::new(DedupFrontier::new(5));
        let page = HtmlPage::new(SEARCH_URL, html);
        let harvest = controller(5, 8, frontier.clone()).harvest(&page).await.unwrap();

        let urls: Vec<String> = harvest.requests.iter().map(|r| r.url.clone()).collect();
        let expected: Vec<String> = (0..5)
            .map(|i| format!("https://www.google.com/maps/place/shop-{i}"))
            .collect();
        assert_eq!(harvest.anchors, 12);
        assert_eq!(urls, expected);
        assert_eq!(frontier.reserved(), 5);
    }

    #[tokio::test]
    async fn truncates_to_remaining_capacity() {
        let frontier = Arc::new(DedupFrontier::new(4));
        assert!(frontier.try_reserve("https://www.google.com/maps/place/earlier"));
        let page = HtmlPage::new(SEARCH_URL, feed_html(10));
        let harvest = controller(4, 2, frontier.clone()).harvest(&page).await.unwrap();
        assert_eq!(harvest.requests.len(), 3);
        assert_eq!(frontier.reserved(), 4);
    }
}
