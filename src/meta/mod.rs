use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;

pub mod model;

pub use model::{AdAccount, AdParams, AdSetParams, CampaignParams, CreativeParams, Lookup};
use model::{CreatedResp, GraphErrorBody, ImagesResp, ListResp, Paging};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/";

/// Pages followed by one name lookup.
const MAX_LOOKUP_PAGES: usize = 20;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("graph api error {code} (subcode {subcode:?}): {message}")]
    Api {
        code: i64,
        subcode: Option<i64>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl PlatformError {
    pub fn subcode(&self) -> Option<i64> {
        match self {
            PlatformError::Api { subcode, .. } => *subcode,
            _ => None,
        }
    }
}

/// Advertising platform seam. Every created object starts paused.
#[async_trait]
pub trait AdPlatform: Send + Sync {
    /// Ids of objects on `lookup` whose name equals `name` exactly. Deleted,
    /// archived and disapproved objects are left out. A scan that cannot be
    /// completed is an error, never a partial answer.
    async fn find_by_name(
        &self,
        account: &AdAccount,
        lookup: &Lookup,
        name: &str,
    ) -> Result<Vec<String>, PlatformError>;

    /// Upload PNG bytes to the account's image library; returns the image hash.
    async fn upload_image(
        &self,
        account: &AdAccount,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, PlatformError>;

    async fn create_campaign(
        &self,
        account: &AdAccount,
        params: &CampaignParams,
    ) -> Result<String, PlatformError>;

    async fn create_ad_set(
        &self,
        account: &AdAccount,
        params: &AdSetParams,
    ) -> Result<String, PlatformError>;

    async fn create_creative(
        &self,
        account: &AdAccount,
        params: &CreativeParams,
    ) -> Result<String, PlatformError>;

    async fn create_ad(&self, account: &AdAccount, params: &AdParams)
        -> Result<String, PlatformError>;
}

pub fn build_campaign_request(params: &CampaignParams) -> Value {
    json!({
        "name": params.name,
        "objective": "OUTCOME_APP_PROMOTION",
        "status": "PAUSED",
        "special_ad_categories": [],
        "buying_type": "AUCTION",
    })
}

pub fn build_ad_set_request(account: &AdAccount, params: &AdSetParams) -> Value {
    json!({
        "name": params.name,
        "campaign_id": params.campaign_id,
        "daily_budget": params.daily_budget_minor,
        "billing_event": "IMPRESSIONS",
        "optimization_goal": "APP_INSTALLS",
        "bid_strategy": "LOWEST_COST_WITHOUT_CAP",
        "status": "PAUSED",
        "promoted_object": {
            "application_id": account.application_id,
            "object_store_url": account.store_url,
        },
        "targeting": params.targeting,
    })
}

pub fn build_creative_request(account: &AdAccount, params: &CreativeParams) -> Value {
    let mut story = json!({
        "page_id": account.page_id,
        "link_data": {
            "message": params.message,
            "link": account.store_url,
            "image_hash": params.image_hash,
            "call_to_action": {
                "type": "INSTALL_MOBILE_APP",
                "value": {
                    "link": account.store_url,
                    "application": account.application_id,
                },
            },
        },
    });
    if let Some(ig) = account.instagram_id.as_deref().filter(|s| !s.trim().is_empty()) {
        story["instagram_user_id"] = json!(ig);
    }
    json!({
        "name": params.name,
        "object_story_spec": story,
        "contextual_multi_ads": { "enroll_status": "OPT_OUT" },
    })
}

pub fn build_ad_request(params: &AdParams) -> Value {
    json!({
        "name": params.name,
        "adset_id": params.ad_set_id,
        "creative": { "creative_id": params.creative_id },
        "status": "PAUSED",
    })
}

/// Graph edge path (relative to the version root) for a lookup.
pub fn lookup_edge(account: &AdAccount, lookup: &Lookup) -> String {
    match lookup {
        Lookup::Campaigns => format!("{}/campaigns", account.account_node()),
        Lookup::AdSets { campaign_id } => format!("{campaign_id}/adsets"),
        Lookup::Creatives => format!("{}/adcreatives", account.account_node()),
        Lookup::Ads { ad_set_id } => format!("{ad_set_id}/ads"),
    }
}

/// Next page of a name lookup, or an error once the page budget is spent
/// with pages left.
fn next_lookup_page(
    pages: usize,
    paging: Option<Paging>,
    name: &str,
) -> Result<Option<Url>, PlatformError> {
    let Some(next) = paging.and_then(|p| p.next) else {
        return Ok(None);
    };
    if pages >= MAX_LOOKUP_PAGES {
        warn!(name, pages, "name lookup truncated");
        return Err(PlatformError::Decode(format!(
            "name lookup for {name:?} truncated after {pages} pages"
        )));
    }
    Url::parse(&next)
        .map(Some)
        .map_err(|e| PlatformError::Decode(format!("invalid paging url {next}: {e}")))
}

#[derive(Clone)]
pub struct MetaClient {
    http: Client,
    base_url: Url,
    token: String,
    api_version: String,
}

impl fmt::Debug for MetaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaClient")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl MetaClient {
    pub fn new(token: String, api_version: String) -> anyhow::Result<Self> {
        let base_url = Url::parse(GRAPH_API_BASE).context("invalid Graph API base URL")?;
        Self::with_base_url(token, api_version, base_url)
    }

    pub fn with_base_url(token: String, api_version: String, base_url: Url) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("creative-ledger/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
            api_version,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        Self::new(cfg.meta.access_token.clone(), cfg.meta.api_version.clone())
    }

    fn endpoint(&self, path: &str) -> Result<Url, PlatformError> {
        self.base_url
            .join(&format!("{}/{}", self.api_version.trim_matches('/'), path))
            .map_err(|e| PlatformError::Decode(format!("invalid endpoint {path}: {e}")))
    }

    async fn read<T: DeserializeOwned>(&self, res: reqwest::Response) -> Result<T, PlatformError> {
        let status = res.status();
        let body = res.text().await?;
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("rate limited by Graph API");
        }
        if !status.is_success() {
            return Err(match serde_json::from_str::<GraphErrorBody>(&body) {
                Ok(err) => PlatformError::Api {
                    code: err.error.code,
                    subcode: err.error.error_subcode,
                    message: err.error.error_user_msg.unwrap_or(err.error.message),
                },
                Err(_) => PlatformError::Api {
                    code: i64::from(status.as_u16()),
                    subcode: None,
                    message: body,
                },
            });
        }
        serde_json::from_str(&body).map_err(|e| PlatformError::Decode(format!("{e}: {body}")))
    }

    async fn create(&self, path: &str, body: &Value) -> Result<String, PlatformError> {
        let url = self.endpoint(path)?;
        debug!(%url, "graph create");
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let created: CreatedResp = self.read(res).await?;
        Ok(created.id)
    }
}

#[async_trait]
impl AdPlatform for MetaClient {
    #[instrument(skip_all)]
    async fn find_by_name(
        &self,
        account: &AdAccount,
        lookup: &Lookup,
        name: &str,
    ) -> Result<Vec<String>, PlatformError> {
        let filtering = json!([{ "field": "name", "operator": "EQUAL", "value": name }]);
        let mut url = self.endpoint(&lookup_edge(account, lookup))?;
        url.query_pairs_mut()
            .append_pair("fields", lookup.fields())
            .append_pair("filtering", &filtering.to_string())
            .append_pair("limit", "100");

        let mut ids = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;
        while let Some(page_url) = next.take() {
            let res = self.http.get(page_url).bearer_auth(&self.token).send().await?;
            let page: ListResp = self.read(res).await?;
            // The server-side filter is advisory; compare names exactly.
            ids.extend(
                page.data
                    .into_iter()
                    .filter(|o| o.name == name && o.is_live())
                    .map(|o| o.id),
            );
            pages += 1;
            next = next_lookup_page(pages, page.paging, name)?;
        }
        Ok(ids)
    }

    #[instrument(skip_all)]
    async fn upload_image(
        &self,
        account: &AdAccount,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, PlatformError> {
        let url = self.endpoint(&format!("{}/adimages", account.account_node()))?;
        let body = json!({ "bytes": BASE64.encode(bytes), "name": file_name });
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let images: ImagesResp = self.read(res).await?;
        images
            .images
            .into_values()
            .next()
            .map(|img| img.hash)
            .ok_or_else(|| PlatformError::Decode("adimages response without images".into()))
    }

    #[instrument(skip_all)]
    async fn create_campaign(
        &self,
        account: &AdAccount,
        params: &CampaignParams,
    ) -> Result<String, PlatformError> {
        let id = self
            .create(
                &format!("{}/campaigns", account.account_node()),
                &build_campaign_request(params),
            )
            .await?;
        info!(campaign_id = %id, name = %params.name, "campaign created");
        Ok(id)
    }

    #[instrument(skip_all)]
    async fn create_ad_set(
        &self,
        account: &AdAccount,
        params: &AdSetParams,
    ) -> Result<String, PlatformError> {
        let id = self
            .create(
                &format!("{}/adsets", account.account_node()),
                &build_ad_set_request(account, params),
            )
            .await?;
        info!(ad_set_id = %id, name = %params.name, "ad set created");
        Ok(id)
    }

    #[instrument(skip_all)]
    async fn create_creative(
        &self,
        account: &AdAccount,
        params: &CreativeParams,
    ) -> Result<String, PlatformError> {
        self.create(
            &format!("{}/adcreatives", account.account_node()),
            &build_creative_request(account, params),
        )
        .await
    }

    #[instrument(skip_all)]
    async fn create_ad(&self, account: &AdAccount, params: &AdParams) -> Result<String, PlatformError> {
        self.create(
            &format!("{}/ads", account.account_node()),
            &build_ad_request(params),
        )
        .await
    }
}
