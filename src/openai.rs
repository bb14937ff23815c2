//! Text and image generation collaborators backed by the OpenAI REST API.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::model::{AppProfile, IdeaConcept};

const OPENAI_API_BASE: &str = "https://api.openai.com/";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Up to `count` structured ideas for `app`. Callers decide what to do
    /// with a short answer.
    async fn generate_ideas(
        &self,
        app: &AppProfile,
        count: usize,
        platform: &str,
    ) -> Result<Vec<IdeaConcept>>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// PNG bytes for `prompt` at the configured portrait size.
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    text_model: String,
    image_model: String,
    image_size: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResp {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagesResp {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
}

const SYSTEM_PROMPT: &str = "You design static image ads for mobile apps. \
Every concept should stop the scroll and drive installs. Vary audiences and hooks.";

pub fn build_ideas_prompt(app: &AppProfile, count: usize, platform: &str) -> String {
    format!(
        "App description: {desc}\n\
         Store links for context: iOS {ios} | Android {android}\n\
         Ad platform: {platform}\n\
         Produce exactly {count} ideas, each with a different audience and a different hook.\n\
         Rules: the viewer does not know the brand; keep on-image text to at most 4 words; \
         no trademarks, platform UI or policy-sensitive claims; portrait mobile layout.\n\
         Reply with a JSON object {{\"ideas\": [...]}} whose items have the keys \
         target_audience, platform, hook (1-2 words), idea (1-2 sentences) and image_prompt.",
        desc = app.description,
        ios = app.ios_url,
        android = app.android_url,
    )
}

pub fn build_chat_request(model: &str, user_prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user_prompt },
        ],
        "response_format": { "type": "json_object" },
        "temperature": 0.7,
    })
}

pub fn build_image_request(model: &str, prompt: &str, size: &str) -> Value {
    json!({
        "model": model,
        "prompt": prompt,
        "size": size,
        "n": 1,
    })
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // Drop the info string (`json`) on the opening fence line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Ideas from a model reply: either `{"ideas": [...]}` or a bare array.
/// Items missing required fields are dropped with a warning.
pub fn parse_ideas(text: &str) -> Result<Vec<IdeaConcept>> {
    let value: Value =
        serde_json::from_str(strip_code_fences(text)).context("idea reply is not JSON")?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("ideas") {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow!("idea reply has no \"ideas\" array")),
        },
        _ => return Err(anyhow!("idea reply is neither an object nor an array")),
    };
    let mut ideas = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<IdeaConcept>(item) {
            Ok(idea) => ideas.push(idea),
            Err(err) => warn!(%err, "dropping malformed idea"),
        }
    }
    Ok(ideas)
}

impl OpenAiClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(OPENAI_API_BASE).context("invalid OpenAI base URL")?;
        Self::with_base_url(cfg, base_url)
    }

    pub fn with_base_url(cfg: &Config, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("creative-ledger/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.openai.api_key.clone(),
            text_model: cfg.openai.text_model.clone(),
            image_model: cfg.openai.image_model.clone(),
            image_size: cfg.openai.image_size.clone(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = self.base_url.join(path).context("invalid OpenAI endpoint")?;
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("failed to reach OpenAI")?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by OpenAI");
            return Err(anyhow!("received 429 from OpenAI: {body}"));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("openai error {status}: {body}"));
        }
        Ok(res)
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    #[instrument(skip_all)]
    async fn generate_ideas(
        &self,
        app: &AppProfile,
        count: usize,
        platform: &str,
    ) -> Result<Vec<IdeaConcept>> {
        let prompt = build_ideas_prompt(app, count, platform);
        let body = build_chat_request(&self.text_model, &prompt);
        let res = self.post_json("v1/chat/completions", &body).await?;
        let chat: ChatResp = res.json().await.context("invalid chat completion JSON")?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion without content"))?;
        let ideas = parse_ideas(&content)?;
        debug!(requested = count, received = ideas.len(), "ideas generated");
        Ok(ideas)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    #[instrument(skip_all)]
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>> {
        let body = build_image_request(&self.image_model, prompt, &self.image_size);
        let res = self.post_json("v1/images/generations", &body).await?;
        let images: ImagesResp = res.json().await.context("invalid image generation JSON")?;
        let b64 = images
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .ok_or_else(|| anyhow!("image generation returned no data"))?;
        BASE64.decode(b64.trim()).context("image payload is not base64")
    }
}
