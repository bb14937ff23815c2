//! Parameter and response types for the Marketing (Graph) API.
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Account wiring for one app: where objects are created and what they promote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdAccount {
    pub ad_account_id: String,
    pub page_id: String,
    pub application_id: String,
    pub store_url: String,
    pub instagram_id: Option<String>,
}

impl AdAccount {
    /// Graph node of the account, always `act_`-prefixed.
    pub fn account_node(&self) -> String {
        let id = self.ad_account_id.trim();
        if id.starts_with("act_") {
            id.to_string()
        } else {
            format!("act_{id}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignParams {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdSetParams {
    pub name: String,
    pub campaign_id: String,
    pub daily_budget_minor: u64,
    pub targeting: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreativeParams {
    pub name: String,
    pub image_hash: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdParams {
    pub name: String,
    pub ad_set_id: String,
    pub creative_id: String,
}

/// Edge searched by an exact-name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Campaigns,
    AdSets { campaign_id: String },
    Creatives,
    Ads { ad_set_id: String },
}

impl Lookup {
    /// Fields requested per object. Creatives report `status`, the rest
    /// `effective_status`.
    pub fn fields(&self) -> &'static str {
        match self {
            Lookup::Creatives => "id,name,status",
            _ => "id,name,effective_status",
        }
    }
}

/// Statuses of objects that can no longer serve and are never reused.
const RETIRED_STATUSES: [&str; 3] = ["DELETED", "ARCHIVED", "DISAPPROVED"];

pub fn is_retired(status: &str) -> bool {
    RETIRED_STATUSES
        .iter()
        .any(|s| s.eq_ignore_ascii_case(status.trim()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedResp {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamedObject {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub effective_status: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl NamedObject {
    /// Whether the object may be attached to a ledger row again.
    pub fn is_live(&self) -> bool {
        self.effective_status
            .as_deref()
            .or(self.status.as_deref())
            .map_or(true, |s| !is_retired(s))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListResp {
    #[serde(default)]
    pub data: Vec<NamedObject>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesResp {
    pub images: HashMap<String, ImageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageEntry {
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorBody {
    pub error: GraphError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub error_user_msg: Option<String>,
}
