//! Detail-page fetching: metadata table and primary image of one artwork.

use std::collections::BTreeMap;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::{FetchSettings, Selectors, Settings},
    error::{ConfigError, RecordError},
    identifier::RecordId,
    renderer::compile,
};

/// Table labels on the detail page and the field names they are stored under.
const FIELD_LABELS: &[(&str, &str)] = &[
    ("Author:", "author"),
    ("Authors:", "authors"),
    ("Title:", "title"),
    ("Place:", "place"),
    ("Place of creation:", "place"),
    ("Manufacture, workshop, firm:", "workshop"),
    ("Date:", "date"),
    ("School:", "school"),
    ("Material:", "material"),
    ("Technique:", "technique"),
    ("Dimensions:", "dimensions"),
    ("Inventory Number:", "inventory_nr"),
    ("Category:", "category"),
    ("Collection:", "collection"),
    ("Subcollection:", "sub_collection"),
];

fn field_name(label: &str) -> Option<&'static str> {
    FIELD_LABELS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, name)| *name)
}

/// One fetched artwork: identifier, metadata fields and image bytes.
#[derive(Debug, Clone)]
pub struct ArtworkRecord {
    id: RecordId,
    url: Url,
    fields: BTreeMap<String, String>,
    image_url: Url,
    image: Vec<u8>,
}

impl ArtworkRecord {
    pub fn new(
        id: RecordId,
        url: Url,
        fields: BTreeMap<String, String>,
        image_url: Url,
        image: Vec<u8>,
    ) -> Self {
        Self {
            id,
            url,
            fields,
            image_url,
            image,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Canonical detail-page URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn image_url(&self) -> &Url {
        &self.image_url
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Names from `required` that are absent or empty in this record.
    pub fn missing_fields(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.fields.get(*name).is_none_or(|v| v.is_empty()))
            .cloned()
            .collect()
    }
}

/// What a detail page yields before the image is downloaded.
#[derive(Debug, Default, PartialEq)]
struct DetailPage {
    fields: BTreeMap<String, String>,
    image_src: Option<String>,
}

#[derive(Debug)]
struct DetailSelectors {
    table: Selector,
    image: Selector,
    paragraph: Selector,
    anchor: Selector,
}

impl DetailSelectors {
    fn new(selectors: &Selectors) -> Result<Self, ConfigError> {
        Ok(Self {
            table: compile(&selectors.data_table)?,
            image: compile(&selectors.image)?,
            paragraph: compile("p")?,
            anchor: compile("a")?,
        })
    }
}

fn text_content(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

fn child_divs<'a>(element: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "div")
}

/// Reads the label/value rows of the data table and the image reference.
///
/// Each row is a `div` whose first child `div` holds the label in a `p` and
/// whose second holds the value in an `a` or, failing that, a `p`.
fn parse_detail(html: &str, selectors: &DetailSelectors) -> DetailPage {
    let document = Html::parse_document(html);
    let mut page = DetailPage::default();

    if let Some(table) = document.select(&selectors.table).next() {
        for row in child_divs(table) {
            let mut cells = child_divs(row);
            let (Some(label_cell), Some(value_cell)) = (cells.next(), cells.next()) else {
                continue;
            };

            let Some(label) = label_cell
                .select(&selectors.paragraph)
                .next()
                .map(|p| text_content(&p))
            else {
                continue;
            };
            let Some(name) = field_name(&label) else {
                debug!("ignoring unknown label `{label}`");
                continue;
            };

            let value = value_cell
                .select(&selectors.anchor)
                .next()
                .or_else(|| value_cell.select(&selectors.paragraph).next())
                .map(|e| text_content(&e))
                .filter(|v| !v.is_empty());

            if let Some(value) = value {
                page.fields.insert(name.to_string(), value);
            }
        }
    }

    page.image_src = document
        .select(&selectors.image)
        .find_map(|img| img.value().attr("src"))
        .map(|src| src.trim().to_string())
        .filter(|src| !src.is_empty());

    page
}

/// Fetches detail pages and their images over HTTP.
#[derive(Debug)]
pub struct DetailFetcher {
    client: Client,
    selectors: DetailSelectors,
    collection_url: Url,
    fetch: FetchSettings,
}

impl DetailFetcher {
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(settings.fetch.timeout())
            .user_agent(settings.fetch.user_agent.as_str())
            .build()
            .map_err(|e| ConfigError::Invalid {
                key: "fetch",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            selectors: DetailSelectors::new(&settings.selectors)?,
            collection_url: settings.site.collection_url.clone(),
            fetch: settings.fetch.clone(),
        })
    }

    /// Fetches one artwork, retrying transient failures.
    ///
    /// The identifier is derived first, so a malformed link costs no request.
    pub async fn fetch(&self, link: &Url) -> Result<ArtworkRecord, RecordError> {
        let id = RecordId::from_url(link)?;
        let attempts = self.fetch.retries + 1;

        let mut attempt = 1;
        loop {
            match self.fetch_once(&id, link).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("{id}: attempt {attempt}/{attempts} failed: {e}");
                    attempt += 1;
                    sleep(self.fetch.retry_delay()).await;
                }
                result => return result,
            }
        }
    }

    async fn fetch_once(&self, id: &RecordId, link: &Url) -> Result<ArtworkRecord, RecordError> {
        debug!("fetching {link}");
        let body = self
            .get(link)
            .await?
            .text()
            .await
            .map_err(|e| RecordError::fetch(link, e))?;

        let page = parse_detail(&body, &self.selectors);
        let Some(src) = page.image_src else {
            return Err(RecordError::fetch(link, "detail page references no image"));
        };
        let image_url = link
            .join(&src)
            .map_err(|e| RecordError::fetch(link, format!("bad image reference `{src}`: {e}")))?;

        let image = self
            .get(&image_url)
            .await?
            .bytes()
            .await
            .map_err(|e| RecordError::fetch(&image_url, e))?;

        let url = id
            .canonical_url(&self.collection_url)
            .unwrap_or_else(|_| link.clone());

        Ok(ArtworkRecord::new(
            id.clone(),
            url,
            page.fields,
            image_url,
            image.to_vec(),
        ))
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, RecordError> {
        self.client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| RecordError::fetch(url, e))
    }
}
