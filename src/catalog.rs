//! Read-only app catalog (AppName, Description, iOS_URL, Android_URL).
use std::sync::Arc;
use tracing::instrument;

use crate::error::PipelineError;
use crate::model::AppProfile;
use crate::table::TableBackend;

const NAME: &str = "AppName";
const DESCRIPTION: &str = "Description";
const IOS_URL: &str = "iOS_URL";
const ANDROID_URL: &str = "Android_URL";

pub struct AppCatalog {
    backend: Arc<dyn TableBackend>,
    cache: Option<Vec<AppProfile>>,
}

impl AppCatalog {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self {
            backend,
            cache: None,
        }
    }

    pub fn header() -> Vec<String> {
        [NAME, DESCRIPTION, IOS_URL, ANDROID_URL]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[instrument(skip_all)]
    pub async fn apps(&mut self) -> Result<&[AppProfile], PipelineError> {
        let apps = match self.cache.take() {
            Some(apps) => apps,
            None => {
                let grid = self
                    .backend
                    .read_all()
                    .await
                    .map_err(PipelineError::store_read)?;
                let pos = |name: &str| {
                    grid.header
                        .iter()
                        .position(|h| h.trim().eq_ignore_ascii_case(name))
                };
                let (name, desc, ios, android) =
                    (pos(NAME), pos(DESCRIPTION), pos(IOS_URL), pos(ANDROID_URL));
                let cell = |row: &[String], i: Option<usize>| {
                    i.and_then(|i| row.get(i))
                        .map(|s| s.trim().to_string())
                        .unwrap_or_default()
                };
                grid.rows
                    .iter()
                    .map(|row| AppProfile {
                        name: cell(row, name),
                        description: cell(row, desc),
                        ios_url: cell(row, ios),
                        android_url: cell(row, android),
                    })
                    .filter(|app| !app.name.is_empty())
                    .collect()
            }
        };
        Ok(self.cache.insert(apps).as_slice())
    }

    /// Case-insensitive lookup by app name.
    pub async fn find(&mut self, name: &str) -> Result<Option<AppProfile>, PipelineError> {
        let name = name.trim();
        Ok(self
            .apps()
            .await?
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    pub async fn first(&mut self) -> Result<Option<AppProfile>, PipelineError> {
        Ok(self.apps().await?.first().cloned())
    }

    /// `find(name)` if a name is given, the first entry otherwise.
    pub async fn resolve(&mut self, name: Option<&str>) -> Result<AppProfile, PipelineError> {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => self
                .find(name)
                .await?
                .ok_or_else(|| PipelineError::UnknownApp(name.to_string())),
            None => self
                .first()
                .await?
                .ok_or_else(|| PipelineError::UnknownApp("<first catalog entry>".into())),
        }
    }
}
