use serde::{Deserialize, Serialize};

/// Which handler a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Results list page. Also the route for unlabeled requests.
    #[default]
    Search,
    /// Single listing page.
    Detail,
}

/// A page visit handed to the crawling engine.
///
/// The label is fixed at construction; there is no setter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(default)]
    label: Label,
}

impl CrawlRequest {
    /// The seeded request of a run.
    pub fn search(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: Label::Search,
        }
    }

    pub(crate) fn detail(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: Label::Detail,
        }
    }

    pub fn label(&self) -> Label {
        self.label
    }
}

/// One harvested business listing.
///
/// Field order matches the output schema of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub name: Option<String>,
    pub address: Option<String>,
    pub rating: Option<String>,
    pub reviews: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub category: Option<String>,
    pub url: String,
}

/// Build the seed URL by percent-encoding the query into `template`.
///
/// `{query}` in the template is replaced; a template without the placeholder
/// gets the encoded query appended.
pub fn seed_url(template: &str, query: &str) -> String {
    let encoded = urlencoding::encode(query.trim());
    if template.contains("{query}") {
        template.replace("{query}", &encoded)
    } else {
        format!("{}{}", template, encoded)
    }
}
