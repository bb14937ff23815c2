#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use creative_ledger::config::{self, Config};
use creative_ledger::db::{self, Pool};
use creative_ledger::drive::{BlobStore, StoredBlob};
use creative_ledger::ledger::{ref_fields, Ledger};
use creative_ledger::meta::{
    AdAccount, AdParams, AdPlatform, AdSetParams, CampaignParams, CreativeParams, Lookup,
    PlatformError,
};
use creative_ledger::meta::model::is_retired;
use creative_ledger::model::{AppProfile, IdeaConcept, LedgerRow, Status};
use creative_ledger::openai::{ImageGenerator, TextGenerator};
use creative_ledger::catalog::AppCatalog;
use creative_ledger::error::ObjectRole;
use creative_ledger::table::{CellWrite, Grid, SqliteTable, TableBackend};

pub fn example_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

pub async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// Catalog sheet with FocusTimer and one app that has no campaign settings.
pub async fn seeded_catalog(pool: &Pool) -> Arc<SqliteTable> {
    let table = Arc::new(SqliteTable::named(pool.clone(), "apps"));
    table.write_header(&AppCatalog::header()).await.unwrap();
    table
        .append_rows(&[
            vec![
                "FocusTimer".into(),
                "Pomodoro timer that blocks distracting apps".into(),
                "https://apps.apple.com/app/focustimer".into(),
                "https://play.google.com/store/apps/details?id=com.example.focustimer".into(),
            ],
            vec![
                "SleepWell".into(),
                "Bedtime stories and white noise".into(),
                "".into(),
                "https://play.google.com/store/apps/details?id=com.example.sleepwell".into(),
            ],
        ])
        .await
        .unwrap();
    table
}

pub fn concept(hook: &str) -> IdeaConcept {
    IdeaConcept {
        target_audience: format!("{hook} seekers"),
        platform: None,
        hook: hook.into(),
        idea: format!("An ad built around {hook}"),
        image_prompt: format!("Portrait illustration about {hook}"),
    }
}

/// Uploaded rows as the image stage would leave them.
pub async fn seed_uploaded(ledger: &mut Ledger, blobs: &FakeBlobs, app: &str, hooks: &[&str]) -> Vec<i64> {
    ledger.ensure_schema().await.unwrap();
    let ids = ledger.allocate_ids(hooks.len()).await.unwrap();
    let created_at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
    let mut rows = Vec::new();
    for (id, hook) in ids.iter().zip(hooks) {
        let mut row = LedgerRow::ideated(*id, created_at, app, "Meta", &concept(hook));
        let name = creative_ledger::naming::asset_file_name(*id, hook);
        row.asset_url = blobs.upload_png(&name, vec![1, 2, 3]).await.unwrap().url;
        row.status = Status::Uploaded;
        rows.push(row);
    }
    ledger.append_rows(&rows).await.unwrap();
    ids
}

/// Write `id` under `role` the way a previous run would have.
pub async fn record_ref(ledger: &mut Ledger, row_id: i64, role: ObjectRole, id: &str) {
    ledger.update_fields(row_id, &ref_fields(role, id)).await.unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Campaign,
    AdSet,
    Creative,
    Ad,
    Image,
}

#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub kind: Kind,
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reject the call.
    Reject,
    /// Create the object but fail the response.
    LoseResponse,
}

/// In-memory advertising account that records every call.
#[derive(Clone, Default)]
pub struct FakePlatform {
    pub objects: Arc<Mutex<Vec<RemoteObject>>>,
    pub lookups: Arc<Mutex<Vec<(String, String)>>>,
    pub ad_sets: Arc<Mutex<Vec<AdSetParams>>>,
    faults: Arc<Mutex<HashMap<Kind, VecDeque<Fault>>>>,
    counter: Arc<Mutex<u32>>,
}

impl FakePlatform {
    pub async fn fail_next(&self, kind: Kind, fault: Fault) {
        self.faults.lock().await.entry(kind).or_default().push_back(fault);
    }

    pub async fn count(&self, kind: Kind) -> usize {
        self.objects.lock().await.iter().filter(|o| o.kind == kind).count()
    }

    pub async fn names(&self, kind: Kind) -> Vec<String> {
        self.objects
            .lock()
            .await
            .iter()
            .filter(|o| o.kind == kind)
            .map(|o| o.name.clone())
            .collect()
    }

    /// Pretend an object already exists remotely.
    pub async fn insert(&self, kind: Kind, name: &str, parent: Option<&str>) -> String {
        let id = self.next_id(kind).await;
        self.objects.lock().await.push(RemoteObject {
            kind,
            id: id.clone(),
            name: name.into(),
            parent: parent.map(str::to_string),
            status: "PAUSED".into(),
        });
        id
    }

    /// Change the remote status of an object, as review on the platform would.
    pub async fn set_status(&self, id: &str, status: &str) {
        for object in self.objects.lock().await.iter_mut().filter(|o| o.id == id) {
            object.status = status.into();
        }
    }

    async fn next_id(&self, kind: Kind) -> String {
        let mut counter = self.counter.lock().await;
        *counter += 1;
        format!("{kind:?}-{}", *counter).to_lowercase()
    }

    async fn create(&self, kind: Kind, name: &str, parent: Option<&str>) -> Result<String, PlatformError> {
        let fault = self
            .faults
            .lock()
            .await
            .get_mut(&kind)
            .and_then(|q| q.pop_front());
        if fault == Some(Fault::Reject) {
            return Err(PlatformError::Api {
                code: 100,
                subcode: Some(1_487_390),
                message: format!("{kind:?} rejected"),
            });
        }
        let id = self.insert(kind, name, parent).await;
        if fault == Some(Fault::LoseResponse) {
            return Err(PlatformError::Decode("connection reset".into()));
        }
        Ok(id)
    }
}

#[async_trait]
impl AdPlatform for FakePlatform {
    async fn find_by_name(
        &self,
        _account: &AdAccount,
        lookup: &Lookup,
        name: &str,
    ) -> Result<Vec<String>, PlatformError> {
        let (kind, parent) = match lookup {
            Lookup::Campaigns => (Kind::Campaign, None),
            Lookup::AdSets { campaign_id } => (Kind::AdSet, Some(campaign_id.as_str())),
            Lookup::Creatives => (Kind::Creative, None),
            Lookup::Ads { ad_set_id } => (Kind::Ad, Some(ad_set_id.as_str())),
        };
        self.lookups
            .lock()
            .await
            .push((format!("{kind:?}"), name.to_string()));
        Ok(self
            .objects
            .lock()
            .await
            .iter()
            .filter(|o| o.kind == kind && o.name == name)
            .filter(|o| parent.is_none() || o.parent.as_deref() == parent)
            .filter(|o| !is_retired(&o.status))
            .map(|o| o.id.clone())
            .collect())
    }

    async fn upload_image(
        &self,
        _account: &AdAccount,
        file_name: &str,
        _bytes: &[u8],
    ) -> Result<String, PlatformError> {
        self.create(Kind::Image, file_name, None).await
    }

    async fn create_campaign(
        &self,
        _account: &AdAccount,
        params: &CampaignParams,
    ) -> Result<String, PlatformError> {
        self.create(Kind::Campaign, &params.name, None).await
    }

    async fn create_ad_set(
        &self,
        _account: &AdAccount,
        params: &AdSetParams,
    ) -> Result<String, PlatformError> {
        self.ad_sets.lock().await.push(params.clone());
        self.create(Kind::AdSet, &params.name, Some(&params.campaign_id))
            .await
    }

    async fn create_creative(
        &self,
        _account: &AdAccount,
        params: &CreativeParams,
    ) -> Result<String, PlatformError> {
        self.create(Kind::Creative, &params.name, None).await
    }

    async fn create_ad(
        &self,
        _account: &AdAccount,
        params: &AdParams,
    ) -> Result<String, PlatformError> {
        self.create(Kind::Ad, &params.name, Some(&params.ad_set_id))
            .await
    }
}

/// Drive-like blob store keyed by share link.
#[derive(Clone, Default)]
pub struct FakeBlobs {
    files: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
    counter: Arc<Mutex<u32>>,
    pub fail_uploads: Arc<Mutex<bool>>,
}

impl FakeBlobs {
    pub async fn stored_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .lock()
            .await
            .values()
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn forget(&self, url: &str) {
        self.files.lock().await.remove(url);
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn upload_png(&self, file_name: &str, bytes: Vec<u8>) -> Result<StoredBlob> {
        if *self.fail_uploads.lock().await {
            return Err(anyhow!("drive quota exceeded"));
        }
        let mut counter = self.counter.lock().await;
        *counter += 1;
        let id = format!("file{}", *counter);
        let url = format!("https://drive.google.com/file/d/{id}/view");
        self.files
            .lock()
            .await
            .insert(url.clone(), (file_name.to_string(), bytes));
        Ok(StoredBlob { id, url })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .await
            .get(url)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| anyhow!("no file behind {url}"))
    }

    async fn file_name(&self, url: &str) -> Result<String> {
        self.files
            .lock()
            .await
            .get(url)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| anyhow!("no file behind {url}"))
    }
}

/// Text generator answering from a script, one entry per call.
#[derive(Clone, Default)]
pub struct ScriptedText {
    responses: Arc<Mutex<VecDeque<Result<Vec<IdeaConcept>>>>>,
    pub calls: Arc<Mutex<Vec<(String, usize, String)>>>,
}

impl ScriptedText {
    pub fn with_responses(responses: Vec<Result<Vec<IdeaConcept>>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedText {
    async fn generate_ideas(
        &self,
        app: &AppProfile,
        count: usize,
        platform: &str,
    ) -> Result<Vec<IdeaConcept>> {
        self.calls
            .lock()
            .await
            .push((app.name.clone(), count, platform.to_string()));
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Image generator that fails for prompts containing `fail`.
#[derive(Clone, Default)]
pub struct FakeImages {
    pub prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>> {
        self.prompts.lock().await.push(prompt.to_string());
        if prompt.contains("fail") {
            return Err(anyhow!("image model timed out"));
        }
        Ok(b"\x89PNG".to_vec())
    }
}

/// Table backend wrapper counting calls per method, optionally failing writes.
#[derive(Clone)]
pub struct CountingTable {
    inner: Arc<dyn TableBackend>,
    pub calls: Arc<std::sync::Mutex<HashMap<&'static str, usize>>>,
    pub fail_writes: Arc<std::sync::Mutex<bool>>,
}

impl CountingTable {
    pub fn new(inner: Arc<dyn TableBackend>) -> Self {
        Self {
            inner,
            calls: Default::default(),
            fail_writes: Default::default(),
        }
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn hit(&self, method: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
        if method != "read_all" && *self.fail_writes.lock().unwrap() {
            return Err(anyhow!("received 429 from Sheets"));
        }
        Ok(())
    }
}

#[async_trait]
impl TableBackend for CountingTable {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn read_all(&self) -> Result<Grid> {
        self.hit("read_all")?;
        self.inner.read_all().await
    }

    async fn write_header(&self, header: &[String]) -> Result<()> {
        self.hit("write_header")?;
        self.inner.write_header(header).await
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        self.hit("append_rows")?;
        self.inner.append_rows(rows).await
    }

    async fn batch_update(&self, cells: &[CellWrite]) -> Result<()> {
        self.hit("batch_update")?;
        self.inner.batch_update(cells).await
    }
}
