use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::config::{DetailSettings, SelectorSet};
use crate::error::{CrawlError, PageError};
use crate::model::{BusinessRecord, CrawlRequest};
use crate::page::Page;

// Leading "Phone:"-style caption on accessible labels.
static PHONE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\d+(]*?:\s*").expect("phone caption regex"));
// Anything before the first digit, plus sign or opening area-code paren.
static NON_DIAL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\d+(]+").expect("dial prefix regex"));
static NON_WORD_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\w]+").expect("word prefix regex"));

/// Trim and turn blank text into `None`.
pub fn clean_text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// `"Phone: (415) 555-0100"` becomes `"(415) 555-0100"`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let without_caption = PHONE_CAPTION.replace(raw.trim(), "");
    let stripped = NON_DIAL_PREFIX.replace(&without_caption, "");
    let phone = stripped.trim();
    (!phone.is_empty()).then(|| phone.to_string())
}

/// `"› example.com"` becomes `"example.com"`.
pub fn normalize_website(raw: &str) -> Option<String> {
    let stripped = NON_WORD_PREFIX.replace(raw, "");
    let site = stripped.trim();
    (!site.is_empty()).then(|| site.to_string())
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Name,
    Rating,
    Reviews,
    Address,
    Phone,
    Website,
    Category,
}

/// Extracts one [`BusinessRecord`] from a loaded listing page.
///
/// Every field is read independently under its own timeout. A field that
/// errors, times out or is absent becomes `None`; nothing a field does can
/// fail the record once the heading is present.
pub struct DetailExtractor {
    selectors: Arc<SelectorSet>,
    settings: DetailSettings,
}

impl DetailExtractor {
    pub fn new(selectors: Arc<SelectorSet>, settings: DetailSettings) -> Self {
        Self {
            selectors,
            settings,
        }
    }

    pub async fn extract(
        &self,
        page: &dyn Page,
        request: &CrawlRequest,
    ) -> Result<BusinessRecord, CrawlError> {
        page.wait_for(&self.selectors.title, self.settings.heading_timeout)
            .await
            .map_err(|e| match e {
                PageError::Timeout { selector } => CrawlError::NavigationTimeout {
                    url: request.url.clone(),
                    selector,
                },
                other => CrawlError::Page(other),
            })?;

        let record = if self.settings.parallel_fields {
            let (name, rating, reviews, address, phone, website, category) = tokio::join!(
                self.attempt(Field::Name, self.name(page)),
                self.attempt(Field::Rating, self.rating(page)),
                self.attempt(Field::Reviews, self.reviews(page)),
                self.attempt(Field::Address, self.address(page)),
                self.attempt(Field::Phone, self.phone(page)),
                self.attempt(Field::Website, self.website(page)),
                self.attempt(Field::Category, self.category(page)),
            );
            BusinessRecord {
                name,
                address,
                rating,
                reviews,
                phone,
                website,
                category,
                url: request.url.clone(),
            }
        } else {
            BusinessRecord {
                name: self.attempt(Field::Name, self.name(page)).await,
                rating: self.attempt(Field::Rating, self.rating(page)).await,
                reviews: self.attempt(Field::Reviews, self.reviews(page)).await,
                address: self.attempt(Field::Address, self.address(page)).await,
                phone: self.attempt(Field::Phone, self.phone(page)).await,
                website: self.attempt(Field::Website, self.website(page)).await,
                category: self.attempt(Field::Category, self.category(page)).await,
                url: request.url.clone(),
            }
        };

        Ok(record)
    }

    async fn attempt<F>(&self, field: Field, read: F) -> Option<String>
    where
        F: Future<Output = Result<Option<String>, PageError>>,
    {
        match tokio::time::timeout(self.settings.field_timeout, read).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                debug!(?field, error = %e, "field extraction failed");
                None
            }
            Err(_) => {
                debug!(?field, timeout = ?self.settings.field_timeout, "field extraction timed out");
                None
            }
        }
    }

    async fn name(&self, page: &dyn Page) -> Result<Option<String>, PageError> {
        Ok(clean_text(page.text_content(&self.selectors.title, 0).await?))
    }

    /// The star label is kept verbatim, e.g. `"4.5 stars "`.
    async fn rating(&self, page: &dyn Page) -> Result<Option<String>, PageError> {
        let label = page.attribute(&self.selectors.rating, 0, "aria-label").await?;
        Ok(label.filter(|l| !l.trim().is_empty()))
    }

    async fn reviews(&self, page: &dyn Page) -> Result<Option<String>, PageError> {
        let selector = self.selectors.reviews.as_str();
        match clean_text(page.text_content(selector, 0).await?) {
            Some(text) => Ok(Some(text)),
            None => Ok(clean_text(page.attribute(selector, 0, "aria-label").await?)),
        }
    }

    async fn address(&self, page: &dyn Page) -> Result<Option<String>, PageError> {
        Ok(clean_text(page.text_content(&self.selectors.address, 0).await?))
    }

    async fn phone(&self, page: &dyn Page) -> Result<Option<String>, PageError> {
        let nested = format!("{} {}", self.selectors.phone_button, self.selectors.phone_text);
        // A failed nested read still falls through to the label.
        let direct = page.text_content(&nested, 0).await.ok().flatten();
        if let Some(phone) = direct.as_deref().and_then(normalize_phone) {
            return Ok(Some(phone));
        }

        let label = page
            .attribute(&self.selectors.phone_button, 0, "aria-label")
            .await?;
        Ok(label.as_deref().and_then(normalize_phone))
    }

    async fn website(&self, page: &dyn Page) -> Result<Option<String>, PageError> {
        let selector = self.selectors.website.as_str();
        let target = page
            .attribute(selector, 0, &self.selectors.website_attribute)
            .await?;
        if let Some(site) = target.as_deref().and_then(normalize_website) {
            return Ok(Some(site));
        }
        let text = page.text_content(selector, 0).await?;
        Ok(text.as_deref().and_then(normalize_website))
    }

    async fn category(&self, page: &dyn Page) -> Result<Option<String>, PageError> {
        let selector = self.selectors.category.as_str();
        let index = self.selectors.category_index;
        if page.count(selector).await? <= index {
            return Ok(None);
        }
        Ok(clean_text(page.text_content(selector, index).await?))
    }
}
