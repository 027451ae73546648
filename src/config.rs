use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub const CONFIG_URL: &str =
    "https://raw.githubusercontent.com/llkrafael-alt/adchegatudo/main/meu-arquivo.json";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RadioConfig {
    pub church_name: String,
    pub stream_url: String,
    pub images: Vec<String>,
    pub primary_color: String,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            church_name: "AD Chega Tudo".to_string(),
            stream_url: "https://stream.zeno.fm/0r0xa792kwzuv".to_string(),
            images: vec![
                "https://images.unsplash.com/photo-1438232992991-995b7058bbb3?q=80&w=1920&auto=format&fit=crop".to_string(),
                "https://images.unsplash.com/photo-1544427920-c49ccfb85579?q=80&w=1920&auto=format&fit=crop".to_string(),
            ],
            primary_color: "#3b82f6".to_string(),
        }
    }
}

/// Local override file, then the remote document, then built-in defaults.
/// Never fails; every error path degrades with a warning.
pub async fn load_config(client: &Client) -> RadioConfig {
    if let Some(config) = read_local_override() {
        return config;
    }

    match fetch_config_from(client, CONFIG_URL).await {
        Ok(config) => {
            info!("config: loaded remote document for '{}'", config.church_name);
            config
        }
        Err(e) => {
            warn!("config: using defaults: {:#}", e);
            RadioConfig::default()
        }
    }
}

fn override_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("capela_tui").join("config.json"))
}

fn read_local_override() -> Option<RadioConfig> {
    let path = override_path()?;
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(v) => {
            info!("config: using local override {}", path.display());
            Some(parse_config(&v))
        }
        Err(e) => {
            warn!("config: ignoring malformed override {}: {}", path.display(), e);
            None
        }
    }
}

pub(crate) async fn fetch_config_from(client: &Client, url: &str) -> Result<RadioConfig> {
    // Time-stamped query defeats CDN caching of the raw document.
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let resp = client
        .get(format!("{}?t={}", url, stamp))
        .send()
        .await
        .context("config document request failed")?;

    if !resp.status().is_success() {
        anyhow::bail!("config document returned HTTP {}", resp.status());
    }

    let json = resp
        .json::<Value>()
        .await
        .context("config document is not valid JSON")?;

    Ok(parse_config(&json))
}

/// Tolerant mapping over the remote document: publishers have used several
/// key spellings over time, and a half-filled document must still work.
pub fn parse_config(v: &Value) -> RadioConfig {
    let defaults = RadioConfig::default();

    let church_name = v
        .get("churchName")
        .or_else(|| v.get("name"))
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(defaults.church_name);

    let stream_url = v
        .get("streamUrl")
        .or_else(|| v.get("stream"))
        .or_else(|| v.get("url"))
        .or_else(|| v.get("link"))
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or(defaults.stream_url);

    let images = v
        .get("images")
        .and_then(|x| x.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        })
        .filter(|list| !list.is_empty())
        .unwrap_or(defaults.images);

    let primary_color = v
        .get("primaryColor")
        .or_else(|| v.get("color"))
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| parse_hex_color(s).is_some())
        .unwrap_or(defaults.primary_color);

    RadioConfig {
        church_name,
        stream_url,
        images,
        primary_color,
    }
}

pub fn parse_hex_color(s: &str) -> Option<(u8, u8, u8)> {
    let hex = s.trim().strip_prefix('#')?;
    // byte indexing below; reject anything that is not plain ascii hex
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_canonical_keys() {
        let v = json!({
            "churchName": "Igreja do Centro",
            "streamUrl": "https://stream.example/radio",
            "images": ["https://img.example/a.jpg"],
            "primaryColor": "#112233"
        });
        let cfg = parse_config(&v);
        assert_eq!(cfg.church_name, "Igreja do Centro");
        assert_eq!(cfg.stream_url, "https://stream.example/radio");
        assert_eq!(cfg.images, vec!["https://img.example/a.jpg".to_string()]);
        assert_eq!(cfg.primary_color, "#112233");
    }

    #[test]
    fn parses_alias_keys() {
        let v = json!({
            "name": "Igreja da Vila",
            "link": "https://stream.example/vila",
            "color": "#abcdef"
        });
        let cfg = parse_config(&v);
        assert_eq!(cfg.church_name, "Igreja da Vila");
        assert_eq!(cfg.stream_url, "https://stream.example/vila");
        assert_eq!(cfg.primary_color, "#abcdef");
    }

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = parse_config(&json!({}));
        assert_eq!(cfg, RadioConfig::default());
    }

    #[test]
    fn blank_and_malformed_fields_fall_back() {
        let v = json!({
            "churchName": "   ",
            "stream": 42,
            "images": [],
            "primaryColor": "blue"
        });
        let cfg = parse_config(&v);
        assert_eq!(cfg, RadioConfig::default());
    }

    #[test]
    fn non_string_image_entries_are_skipped() {
        let v = json!({ "images": [1, "https://img.example/only.jpg", null] });
        let cfg = parse_config(&v);
        assert_eq!(cfg.images, vec!["https://img.example/only.jpg".to_string()]);
    }

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_color("#3b82f6"), Some((0x3b, 0x82, 0xf6)));
        assert_eq!(parse_hex_color(" #FFFFFF "), Some((255, 255, 255)));
        assert_eq!(parse_hex_color("3b82f6"), None);
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#gggggg"), None);
        assert_eq!(parse_hex_color("#ááá"), None);
    }

    #[tokio::test]
    async fn remote_document_is_fetched_and_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meu-arquivo.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Radio Remota",
                "url": "https://stream.example/remota"
            })))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = format!("{}/meu-arquivo.json", server.uri());
        let cfg = fetch_config_from(&client, &url).await.unwrap();
        assert_eq!(cfg.church_name, "Radio Remota");
        assert_eq!(cfg.stream_url, "https://stream.example/remota");
    }

    #[tokio::test]
    async fn remote_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new();
        let err = fetch_config_from(&client, &server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
