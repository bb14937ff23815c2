use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, ObjectRole};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Status {
    Ideated,
    Uploaded,
    Tested,
    Rejected,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ideated => "Ideated",
            Status::Uploaded => "Uploaded",
            Status::Tested => "Tested",
            Status::Rejected => "Rejected",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ideated" => Some(Status::Ideated),
            "uploaded" => Some(Status::Uploaded),
            "tested" => Some(Status::Tested),
            "rejected" => Some(Status::Rejected),
            _ => None,
        }
    }

    /// Terminal statuses belong to the reviewer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Tested | Status::Rejected)
    }

    /// Position in the funnel; terminal statuses share the last step.
    pub fn rank(&self) -> u8 {
        match self {
            Status::Ideated => 0,
            Status::Uploaded => 1,
            Status::Tested | Status::Rejected => 2,
        }
    }
}

/// Identifiers of remote objects already created for a row.
///
/// The fields form a containment chain (campaign ⊃ ad set ⊃ creative ⊃ ad);
/// constructors and setters refuse to record a link whose parent is missing.
/// The image handle is independent of the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRefs {
    campaign: Option<String>,
    ad_set: Option<String>,
    creative: Option<String>,
    ad: Option<String>,
    image_hash: Option<String>,
}

impl ExternalRefs {
    pub fn from_parts(
        campaign: Option<String>,
        ad_set: Option<String>,
        creative: Option<String>,
        ad: Option<String>,
        image_hash: Option<String>,
    ) -> Result<Self, ChainError> {
        let refs = Self {
            campaign: non_empty(campaign),
            ad_set: non_empty(ad_set),
            creative: non_empty(creative),
            ad: non_empty(ad),
            image_hash: non_empty(image_hash),
        };
        refs.check()?;
        Ok(refs)
    }

    fn check(&self) -> Result<(), ChainError> {
        let links = [
            (ObjectRole::Campaign, self.campaign.is_some()),
            (ObjectRole::AdSet, self.ad_set.is_some()),
            (ObjectRole::Creative, self.creative.is_some()),
            (ObjectRole::Ad, self.ad.is_some()),
        ];
        for pair in links.windows(2) {
            let (parent, has_parent) = pair[0];
            let (child, has_child) = pair[1];
            if has_child && !has_parent {
                return Err(ChainError {
                    child,
                    missing: parent,
                });
            }
        }
        Ok(())
    }

    pub fn campaign(&self) -> Option<&str> {
        self.campaign.as_deref()
    }

    pub fn ad_set(&self) -> Option<&str> {
        self.ad_set.as_deref()
    }

    pub fn creative(&self) -> Option<&str> {
        self.creative.as_deref()
    }

    pub fn ad(&self) -> Option<&str> {
        self.ad.as_deref()
    }

    pub fn image_hash(&self) -> Option<&str> {
        self.image_hash.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Record `id` under `role`, enforcing the containment chain.
    pub fn record(&mut self, role: ObjectRole, id: &str) -> Result<(), ChainError> {
        let id = Some(id.to_string());
        match role {
            ObjectRole::Campaign => self.campaign = id,
            ObjectRole::AdSet => {
                require(self.campaign.is_some(), role, ObjectRole::Campaign)?;
                self.ad_set = id;
            }
            ObjectRole::Creative => {
                require(self.ad_set.is_some(), role, ObjectRole::AdSet)?;
                self.creative = id;
            }
            ObjectRole::Ad => {
                require(self.creative.is_some(), role, ObjectRole::Creative)?;
                self.ad = id;
            }
            ObjectRole::Image => self.image_hash = id,
        }
        Ok(())
    }
}

fn require(present: bool, child: ObjectRole, missing: ObjectRole) -> Result<(), ChainError> {
    if present {
        Ok(())
    } else {
        Err(ChainError { child, missing })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One creative idea tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    pub app_name: String,
    pub target_audience: String,
    pub platform: String,
    pub hook: String,
    pub idea: String,
    pub image_prompt: String,
    pub asset_url: String,
    pub refs: ExternalRefs,
}

impl LedgerRow {
    pub fn ideated(
        id: i64,
        created_at: DateTime<Utc>,
        app_name: &str,
        platform: &str,
        concept: &IdeaConcept,
    ) -> Self {
        let platform = concept
            .platform
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(platform);
        Self {
            id,
            created_at,
            status: Status::Ideated,
            app_name: app_name.to_string(),
            target_audience: concept.target_audience.clone(),
            platform: platform.to_string(),
            hook: concept.hook.clone(),
            idea: concept.idea.clone(),
            image_prompt: concept.image_prompt.clone(),
            asset_url: String::new(),
            refs: ExternalRefs::default(),
        }
    }
}

/// Entry of the read-only app catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppProfile {
    pub name: String,
    pub description: String,
    pub ios_url: String,
    pub android_url: String,
}

/// Structured idea returned by the text-generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdeaConcept {
    pub target_audience: String,
    #[serde(default)]
    pub platform: Option<String>,
    pub hook: String,
    pub idea: String,
    pub image_prompt: String,
}

/// Fields that decide whether two rows share one campaign/ad-set pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CampaignIntent {
    pub app_name: String,
    pub network: String,
    pub platform: String,
    pub geo: String,
    pub targeting_key: String,
    pub campaign_type: String,
    pub data_source: String,
}
