//! STAC item search and asset signing.
//!
//! Covers the subset of the STAC API the pipeline needs: `POST /search` by
//! collection, bbox and datetime, pagination through `next` links, and
//! Planetary Computer SAS signing of asset hrefs. Each request is attempted
//! once; failures surface as [`StackError::Catalog`].

use crate::config::{CatalogConfig, SigningMode};
use crate::types::{BoundingBox, StackError, StackResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

const USER_AGENT: &str = concat!("floodstack/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A STAC Item Collection (GeoJSON FeatureCollection) page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemCollection {
    #[serde(default)]
    pub features: Vec<StacItem>,

    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacItemCollection {
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

/// A single STAC Item: one SAR scene or one elevation tile.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StacItem {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    #[serde(default)]
    pub properties: StacItemProperties,

    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,
}

impl StacItem {
    pub fn asset(&self, key: &str) -> Option<&StacAsset> {
        self.assets.get(key)
    }

    /// Acquisition time; static datasets such as a DEM have none
    pub fn datetime(&self) -> Option<&str> {
        self.properties.datetime.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StacItemProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single STAC Asset (file reference).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StacAsset {
    pub href: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// A STAC Link (pagination uses `rel = "next"`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,
}

// ---------------------------------------------------------------------------
// Search request
// ---------------------------------------------------------------------------

/// Body for `POST /search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub collections: Vec<String>,

    /// `[west, south, east, north]` in EPSG:4326
    pub bbox: [f64; 4],

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl SearchRequest {
    pub fn new(collection: &str, bbox: &BoundingBox) -> Self {
        Self {
            collections: vec![collection.to_string()],
            bbox: bbox.to_array(),
            datetime: None,
            limit: None,
        }
    }

    /// Restrict to one calendar day (UTC), both ends inclusive
    pub fn on_day(mut self, date: NaiveDate) -> Self {
        let day = date.format("%Y-%m-%d");
        self.datetime = Some(format!("{day}T00:00:00Z/{day}T23:59:59Z"));
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn collection(&self) -> &str {
        self.collections.first().map(String::as_str).unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Catalog seam
// ---------------------------------------------------------------------------

/// Anything that answers item searches.
///
/// Results come back in catalog order and already signed; an empty result
/// is `Ok(vec![])`.
pub trait Catalog: Send + Sync {
    fn search(&self, request: &SearchRequest) -> StackResult<Vec<StacItem>>;
}

impl<C: Catalog + ?Sized> Catalog for std::sync::Arc<C> {
    fn search(&self, request: &SearchRequest) -> StackResult<Vec<StacItem>> {
        (**self).search(request)
    }
}

/// Rewrites asset hrefs so their pixels can be fetched.
pub trait AssetSigner: Send + Sync {
    fn sign_item(&self, item: &mut StacItem) -> StackResult<()>;
}

/// Leaves hrefs untouched, for public buckets and local fixtures.
pub struct NoSigning;

impl AssetSigner for NoSigning {
    fn sign_item(&self, _item: &mut StacItem) -> StackResult<()> {
        Ok(())
    }
}

/// Appends Planetary Computer SAS tokens to Azure Blob hrefs.
///
/// Tokens are cached per collection and fetched again once they are within
/// [`TOKEN_REFRESH_MARGIN_MINUTES`] of their `msft:expiry`.
pub struct PlanetaryComputerSigner {
    client: reqwest::blocking::Client,
    sas_url: String,
    tokens: Mutex<HashMap<String, SasToken>>,
}

/// Refresh tokens this long before they expire
pub const TOKEN_REFRESH_MARGIN_MINUTES: i64 = 5;

/// Response of the SAS token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SasToken {
    pub token: String,

    #[serde(rename = "msft:expiry", default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl SasToken {
    /// Usable at `now` with the refresh margin to spare. Tokens without an
    /// expiry never go stale.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - chrono::Duration::minutes(TOKEN_REFRESH_MARGIN_MINUTES) > now,
            None => true,
        }
    }
}

impl PlanetaryComputerSigner {
    pub fn new(client: reqwest::blocking::Client, sas_url: &str) -> Self {
        Self {
            client,
            sas_url: sas_url.trim_end_matches('/').to_string(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn token_for(&self, collection: &str) -> StackResult<String> {
        {
            let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = tokens.get(collection) {
                if cached.is_fresh(Utc::now()) {
                    return Ok(cached.token.clone());
                }
                log::info!("SAS token for '{}' is about to expire, refreshing", collection);
            }
        }

        let url = format!("{}/token/{}", self.sas_url, collection);
        log::debug!("Requesting SAS token: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| StackError::Catalog(format!("SAS token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(StackError::Catalog(format!(
                "SAS token endpoint returned HTTP {} for collection '{}'",
                response.status().as_u16(),
                collection
            )));
        }

        let fetched: SasToken = response
            .json()
            .map_err(|e| StackError::Catalog(format!("parsing SAS token response: {}", e)))?;
        log::debug!("SAS token for '{}' expires {:?}", collection, fetched.expiry);

        let token = fetched.token.clone();
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.insert(collection.to_string(), fetched);
        Ok(token)
    }
}

impl AssetSigner for PlanetaryComputerSigner {
    fn sign_item(&self, item: &mut StacItem) -> StackResult<()> {
        let needs_token = item.assets.values().any(|a| is_unsigned_blob_href(&a.href));
        if !needs_token {
            return Ok(());
        }

        let collection = item.collection.clone().ok_or_else(|| {
            StackError::Catalog(format!("item '{}' has no collection to sign against", item.id))
        })?;
        let token = self.token_for(&collection)?;

        for asset in item.assets.values_mut() {
            if is_unsigned_blob_href(&asset.href) {
                asset.href = append_query(&asset.href, &token);
            }
        }
        Ok(())
    }
}

fn is_unsigned_blob_href(href: &str) -> bool {
    match reqwest::Url::parse(href) {
        Ok(url) => {
            let on_blob = url
                .host_str()
                .map(|h| h.ends_with(".blob.core.windows.net"))
                .unwrap_or(false);
            let signed = url.query_pairs().any(|(k, _)| k == "sig");
            on_blob && !signed
        }
        Err(_) => false,
    }
}

fn append_query(href: &str, query: &str) -> String {
    let query = query.trim_start_matches('?');
    if href.contains('?') {
        format!("{}&{}", href, query)
    } else {
        format!("{}?{}", href, query)
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Blocking STAC API client.
pub struct StacClient {
    search_url: String,
    client: reqwest::blocking::Client,
    signer: Box<dyn AssetSigner>,
    page_limit: u32,
    max_items: usize,
}

impl StacClient {
    /// Build a client from catalog settings; the signer follows `config.signing`.
    pub fn new(config: &CatalogConfig) -> StackResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| StackError::Catalog(format!("failed to build HTTP client: {}", e)))?;

        let signer: Box<dyn AssetSigner> = match config.signing {
            SigningMode::PlanetaryComputer => {
                Box::new(PlanetaryComputerSigner::new(client.clone(), &config.sas_url))
            }
            SigningMode::None => Box::new(NoSigning),
        };

        Ok(Self {
            search_url: search_url(&config.url),
            client,
            signer,
            page_limit: config.page_limit,
            max_items: config.max_items,
        })
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    fn post_search(&self, url: &str, body: &serde_json::Value) -> StackResult<StacItemCollection> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|e| StackError::Catalog(format!("STAC search request failed: {}", e)))?;
        Self::parse_page(response)
    }

    fn get_page(&self, url: &str) -> StackResult<StacItemCollection> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| StackError::Catalog(format!("STAC pagination request failed: {}", e)))?;
        Self::parse_page(response)
    }

    fn parse_page(response: reqwest::blocking::Response) -> StackResult<StacItemCollection> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StackError::Catalog(format!(
                "STAC search returned HTTP {}: {}",
                status.as_u16(),
                body.chars().take(300).collect::<String>()
            )));
        }

        let text = response
            .text()
            .map_err(|e| StackError::Catalog(format!("reading STAC response: {}", e)))?;
        serde_json::from_str(&text)
            .map_err(|e| StackError::Catalog(format!("parsing STAC response: {}", e)))
    }

    /// Fetch the page a `next` link points at (GET, or POST with optional merge).
    /// Returns the page and the request body later POST links build on.
    fn follow_next(
        &self,
        link: &StacLink,
        previous: &serde_json::Value,
    ) -> StackResult<(StacItemCollection, serde_json::Value)> {
        match next_body(link, previous) {
            None => Ok((self.get_page(&link.href)?, previous.clone())),
            Some(body) => {
                let page = self.post_search(&link.href, &body)?;
                Ok((page, body))
            }
        }
    }
}

impl Catalog for StacClient {
    fn search(&self, request: &SearchRequest) -> StackResult<Vec<StacItem>> {
        let mut request = request.clone();
        if request.limit.is_none() {
            request.limit = Some(self.page_limit);
        }

        let body = serde_json::to_value(&request)
            .map_err(|e| StackError::Catalog(format!("serializing search: {}", e)))?;
        log::debug!("STAC search {}: {}", self.search_url, body);

        let first = self.post_search(&self.search_url, &body)?;
        let mut items = walk_pages(first, body, self.max_items, |link, previous| {
            self.follow_next(link, previous)
        })?;
        sign_items(self.signer.as_ref(), &mut items)?;

        log::debug!(
            "STAC search in '{}' returned {} item(s)",
            request.collection(),
            items.len()
        );
        Ok(items)
    }
}

/// Collect items from `first` onwards, following `next` links through
/// `follow` until there is no link, a page comes back empty, or
/// `max_items` have been gathered.
fn walk_pages<F>(
    first: StacItemCollection,
    first_body: serde_json::Value,
    max_items: usize,
    mut follow: F,
) -> StackResult<Vec<StacItem>>
where
    F: FnMut(&StacLink, &serde_json::Value) -> StackResult<(StacItemCollection, serde_json::Value)>,
{
    let mut items = Vec::new();
    let mut page = first;
    let mut body = first_body;
    loop {
        let next = page.next_link().cloned();
        items.append(&mut page.features);

        if items.len() >= max_items {
            break;
        }
        let Some(link) = next else { break };

        let (next_page, next_body) = follow(&link, &body)?;
        page = next_page;
        body = next_body;
        if page.features.is_empty() {
            break;
        }
    }
    items.truncate(max_items);
    Ok(items)
}

/// Body for a POST `next` link, `None` when the link is followed with GET
fn next_body(link: &StacLink, previous: &serde_json::Value) -> Option<serde_json::Value> {
    let method = link.method.as_deref().unwrap_or("GET");
    if !method.eq_ignore_ascii_case("POST") {
        return None;
    }
    Some(match (&link.body, link.merge.unwrap_or(false)) {
        (Some(link_body), true) => merge_bodies(previous, link_body),
        (Some(link_body), false) => link_body.clone(),
        (None, _) => previous.clone(),
    })
}

fn sign_items(signer: &dyn AssetSigner, items: &mut [StacItem]) -> StackResult<()> {
    for item in items.iter_mut() {
        signer.sign_item(item)?;
    }
    Ok(())
}

fn search_url(root: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.ends_with("/search") {
        root.to_string()
    } else {
        format!("{}/search", root)
    }
}

fn merge_bodies(base: &serde_json::Value, overlay: &serde_json::Value) -> serde_json::Value {
    let mut merged = base.clone();
    if let (Some(target), Some(source)) = (merged.as_object_mut(), overlay.as_object()) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
    merged
}
