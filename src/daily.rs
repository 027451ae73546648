//! Daily devotional message.
//!
//! Once per day a short verse and thought is generated for the listeners;
//! the result is cached on disk under the local date so every launch that
//! day reuses it. No key, a failed request or a malformed answer all fall
//! back to a built-in message, and failures are never cached so the next
//! launch tries again.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

const MODEL_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";
const PROMPT: &str = "Gere um versículo bíblico encorajador e um pensamento curto e inspirador para os ouvintes de uma rádio evangélica. Responda estritamente em JSON.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMessage {
    pub verse: String,
    pub reference: String,
    pub thought: String,
}

#[derive(Serialize, Deserialize)]
struct CachedMessage {
    date: String,
    message: DailyMessage,
}

pub fn fallback_message() -> DailyMessage {
    DailyMessage {
        verse: "O Senhor é o meu pastor, nada me faltará.".to_string(),
        reference: "Salmos 23:1".to_string(),
        thought: "Confie no cuidado de Deus para sua vida hoje.".to_string(),
    }
}

pub async fn load_daily_message(client: &reqwest::Client) -> DailyMessage {
    let today = Local::now().format("%d/%m/%Y").to_string();
    let cache = cache_path();
    load_for_date(client, &today, cache.as_deref(), api_endpoint().as_deref()).await
}

async fn load_for_date(
    client: &reqwest::Client,
    today: &str,
    cache: Option<&Path>,
    endpoint: Option<&str>,
) -> DailyMessage {
    if let Some(path) = cache {
        if let Some(message) = read_cached(path, today) {
            info!("daily: message for {} already cached", today);
            return message;
        }
    }

    let Some(endpoint) = endpoint else {
        info!("daily: GEMINI_API_KEY not set, using the built-in message");
        return fallback_message();
    };

    match generate_message(client, endpoint).await {
        Ok(message) => {
            if let Some(path) = cache {
                write_cached(path, today, &message);
            }
            message
        }
        Err(err) => {
            // a failed day stays uncached so the next launch tries again
            warn!("daily: generation failed: {:#}", err);
            fallback_message()
        }
    }
}

fn api_endpoint() -> Option<String> {
    let key = std::env::var("GEMINI_API_KEY").ok()?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some(format!("{}?key={}", MODEL_URL, key))
}

async fn generate_message(client: &reqwest::Client, endpoint: &str) -> Result<DailyMessage> {
    let request = json!({
        "contents": [{ "parts": [{ "text": PROMPT }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "verse": { "type": "STRING", "description": "O texto do versículo bíblico" },
                    "reference": { "type": "STRING", "description": "A referência bíblica (ex: João 3:16)" },
                    "thought": { "type": "STRING", "description": "Uma frase curta de encorajamento baseada no versículo" }
                },
                "required": ["verse", "reference", "thought"]
            }
        }
    });

    let response = client
        .post(endpoint)
        .json(&request)
        .send()
        .await
        .context("model request failed")?;
    if !response.status().is_success() {
        bail!("model request returned HTTP {}", response.status());
    }
    let body: Value = response.json().await.context("model response is not json")?;
    parse_model_response(&body)
}

/// The answer text is itself a JSON document, nested inside the first
/// candidate of the API envelope.
fn parse_model_response(body: &Value) -> Result<DailyMessage> {
    let text = body
        .get("candidates")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("content"))
        .and_then(|v| v.get("parts"))
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("text"))
        .and_then(|v| v.as_str())
        .context("model response carried no text")?;

    let message: DailyMessage =
        serde_json::from_str(text).context("model text is not the expected json")?;
    if message.verse.trim().is_empty() || message.reference.trim().is_empty() {
        bail!("model returned empty fields");
    }
    Ok(message)
}

fn cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|base| base.join("capela_tui").join("mensagem.json"))
}

fn read_cached(path: &Path, today: &str) -> Option<DailyMessage> {
    let data = fs::read_to_string(path).ok()?;
    let cached: CachedMessage = serde_json::from_str(&data).ok()?;
    (cached.date == today).then_some(cached.message)
}

fn write_cached(path: &Path, today: &str, message: &DailyMessage) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let cached = CachedMessage {
        date: today.to_string(),
        message: message.clone(),
    };
    match serde_json::to_string(&cached) {
        Ok(json) => {
            if let Err(err) = fs::write(path, json) {
                warn!("daily: could not cache the message: {}", err);
            }
        }
        Err(err) => warn!("daily: could not serialize the message: {}", err),
    }
}
