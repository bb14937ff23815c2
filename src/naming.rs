//! Deterministic names for remote advertising objects.
//!
//! Names double as idempotency keys: the synchronizer looks objects up by the
//! exact name before creating them, so every function here must be pure.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

use crate::model::{CampaignIntent, LedgerRow};

/// Fixed organisational tag prefixed to every ad and creative name.
pub const AD_PREFIX: &str = "CN_AI";

/// Date stamped into campaign names: the UTC calendar day of `now`, so hosts
/// in different timezones produce the same name.
pub fn campaign_date(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// `{app}_{network}_{platform}_{data_source}_{geo}_{targeting}_{type}[_{run}]_{ddmmyy}`
pub fn campaign_name(intent: &CampaignIntent, run_counter: Option<u32>, date: NaiveDate) -> String {
    let mut parts = vec![
        token(&intent.app_name),
        token(&intent.network),
        token(&intent.platform),
        token(&intent.data_source),
        token(&intent.geo),
        token(&intent.targeting_key),
        token(&intent.campaign_type),
    ];
    if let Some(run) = run_counter {
        parts.push(run.to_string());
    }
    parts.push(date.format("%d%m%y").to_string());
    parts.join("_")
}

pub fn ad_set_name(campaign_name: &str) -> String {
    format!("{campaign_name}_AS")
}

/// One `_`-free component of a campaign name. `_` is the separator, so it and
/// whitespace become `-`; a blank field becomes `NA` to keep positions fixed.
///
/// The mapping is lossy: `Focus Timer`, `Focus_Timer` and `Focus-Timer` give
/// the same token, as do a blank field and a literal `NA`. Naming keys that
/// differ only that way name the same campaign.
fn token(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c == '_' || c.is_whitespace() { '-' } else { c })
        .collect();
    if cleaned.is_empty() {
        "NA".to_string()
    } else {
        cleaned
    }
}

/// Alphanumeric characters of a hook, used inside file and ad names.
pub fn hook_fragment(hook: &str) -> String {
    hook.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Blob file name for a row's rendered image.
pub fn asset_file_name(id: i64, hook: &str) -> String {
    format!("Image_{}_{}.png", id, hook_fragment(hook))
}

/// Width-by-height ratio token such as `2x3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X', ':'])
            .ok_or_else(|| format!("invalid size {s:?}"))?;
        let width: u32 = w.trim().parse().map_err(|_| format!("invalid width in {s:?}"))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("invalid height in {s:?}"))?;
        if width == 0 || height == 0 {
            return Err(format!("zero dimension in {s:?}"));
        }
        let g = gcd(width, height);
        Ok(Self {
            width: width / g,
            height: height / g,
        })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Name shared by a row's creative and ad.
///
/// Built from the asset's file name: the stem's tokens minus `image`, the
/// row id and any token of the app name; whatever remains is the hook
/// fragment. Falls back to the row's own hook when nothing survives.
pub fn ad_name(row: &LedgerRow, asset_name: &str, aspect: AspectRatio) -> String {
    let stem = asset_name
        .rsplit_once('.')
        .map(|(stem, _ext)| stem)
        .unwrap_or(asset_name);
    let app_tokens: Vec<String> = row
        .app_name
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect();
    let app_compact = hook_fragment(&row.app_name).to_ascii_lowercase();
    let id_token = row.id.to_string();

    let kept: Vec<String> = stem
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .filter(|t| {
            let lower = t.to_ascii_lowercase();
            lower != "image"
                && lower != app_compact
                && !app_tokens.contains(&lower)
                && t.trim_start_matches('0') != id_token
        })
        .map(hook_fragment)
        .filter(|t| !t.is_empty())
        .collect();

    let fragment = if kept.is_empty() {
        hook_fragment(&row.hook)
    } else {
        kept.concat()
    };
    let fragment = if fragment.is_empty() {
        "NA".to_string()
    } else {
        fragment
    };
    format!("{AD_PREFIX}_{:04}_{}_{}", row.id, fragment, aspect)
}
