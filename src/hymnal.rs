//! Harpa Cristã hymn book: download, normalization, offline cache, search.
//!
//! The remote book is a JSON object keyed by hymn number, with HTML line
//! breaks inside the verse text. It is normalized once into plain-text
//! `Hymn` records and kept on disk so the viewer works offline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

const HYMNS_URL: &str = "https://raw.githubusercontent.com/DanielLiberato/Harpa-Crista-JSON-640-Hinos-Completa/refs/heads/main/harpa_crista_640_hinos.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hymn {
    pub number: u32,
    pub title: String,
    pub lyrics: String,
}

/// Loads the book once, then re-downloads on demand. Every result is
/// published on the watch channel; the UI renders whatever is current.
pub async fn hymnal_task(
    client: reqwest::Client,
    hymns_tx: watch::Sender<Vec<Hymn>>,
    mut refresh_rx: mpsc::UnboundedReceiver<()>,
) {
    let cache = cache_path();
    let loaded = load_from(&client, HYMNS_URL, cache.as_deref()).await;
    let _ = hymns_tx.send(loaded);

    while refresh_rx.recv().await.is_some() {
        let refreshed = force_refresh(&client, HYMNS_URL, cache.as_deref()).await;
        let _ = hymns_tx.send(refreshed);
    }
}

/// Case-insensitive match on number, title or lyrics. An empty query
/// keeps the whole book.
pub fn search<'a>(hymns: &'a [Hymn], query: &str) -> Vec<&'a Hymn> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return hymns.iter().collect();
    }
    hymns
        .iter()
        .filter(|hymn| {
            hymn.number.to_string().contains(&query)
                || hymn.title.to_lowercase().contains(&query)
                || hymn.lyrics.to_lowercase().contains(&query)
        })
        .collect()
}

/// Offline copy first, network second, built-in trio last.
async fn load_from(client: &reqwest::Client, url: &str, cache: Option<&Path>) -> Vec<Hymn> {
    if let Some(path) = cache {
        if let Some(hymns) = read_cache(path) {
            info!("hymnal: {} hymns loaded from offline cache", hymns.len());
            return hymns;
        }
    }

    match fetch_hymns(client, url).await {
        Ok(hymns) => {
            info!("hymnal: downloaded {} hymns", hymns.len());
            if let Some(path) = cache {
                write_cache(path, &hymns);
            }
            hymns
        }
        Err(err) => {
            warn!("hymnal: download failed: {:#}", err);
            fallback_hymns()
        }
    }
}

/// Drops the offline copy and downloads a fresh one.
async fn force_refresh(client: &reqwest::Client, url: &str, cache: Option<&Path>) -> Vec<Hymn> {
    if let Some(path) = cache {
        let _ = fs::remove_file(path);
    }
    load_from(client, url, cache).await
}

async fn fetch_hymns(client: &reqwest::Client, url: &str) -> Result<Vec<Hymn>> {
    let response = client
        .get(url)
        .send()
        .await
        .context("hymn book request failed")?;
    if !response.status().is_success() {
        bail!("hymn book request returned HTTP {}", response.status());
    }
    let document: Value = response
        .json()
        .await
        .context("hymn book is not valid json")?;

    let hymns = parse_hymns(&document);
    if hymns.is_empty() {
        bail!("hymn book contained no hymns");
    }
    Ok(hymns)
}

fn parse_hymns(document: &Value) -> Vec<Hymn> {
    let Some(entries) = document.as_object() else {
        return Vec::new();
    };

    let mut hymns: Vec<Hymn> = entries
        .iter()
        .filter_map(|(key, item)| {
            // metadata keys like "-1" are not hymn numbers
            let number: u32 = key.parse().ok()?;
            if number == 0 {
                return None;
            }
            Some(parse_hymn(number, item))
        })
        .collect();
    hymns.sort_by_key(|hymn| hymn.number);
    hymns
}

fn parse_hymn(number: u32, item: &Value) -> Hymn {
    let title = item
        .get("hino")
        .and_then(|v| v.as_str())
        .map(strip_number_prefix)
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| format!("Hino {}", number));

    let chorus = clean(item.get("coro").and_then(|v| v.as_str()).unwrap_or(""));

    let mut verses: Vec<(u32, &str)> = item
        .get("verses")
        .and_then(|v| v.as_object())
        .map(|verses| {
            verses
                .iter()
                .filter_map(|(key, text)| Some((key.parse::<u32>().ok()?, text.as_str()?)))
                .collect()
        })
        .unwrap_or_default();
    verses.sort_by_key(|(verse_number, _)| *verse_number);

    let mut lyrics = String::new();
    for (index, (_, verse)) in verses.iter().enumerate() {
        lyrics.push_str(&clean(verse));
        lyrics.push_str("\n\n");
        // the chorus comes after the first verse, as sung
        if index == 0 && !chorus.is_empty() {
            lyrics.push_str("[Refrão]\n");
            lyrics.push_str(&chorus);
            lyrics.push_str("\n\n");
        }
    }
    if lyrics.is_empty() && !chorus.is_empty() {
        lyrics = chorus.clone();
    }

    Hymn {
        number,
        title,
        lyrics: lyrics.trim().to_string(),
    }
}

/// Titles often repeat the number, as in "1 - Chuvas de Graça".
fn strip_number_prefix(title: &str) -> String {
    match title.split_once(" - ") {
        Some((_, rest)) => rest.trim().to_string(),
        None => title.trim().to_string(),
    }
}

fn clean(text: &str) -> String {
    static BR: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    let br = BR.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").expect("hard-coded pattern"));
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("hard-coded pattern"));

    let text = br.replace_all(text, "\n");
    let text = tag.replace_all(&text, "");
    text.trim().to_string()
}

fn cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|base| base.join("capela_tui").join("hinos.json"))
}

fn read_cache(path: &Path) -> Option<Vec<Hymn>> {
    let data = fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

fn write_cache(path: &Path, hymns: &[Hymn]) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    match serde_json::to_string(hymns) {
        Ok(json) => {
            if let Err(err) = fs::write(path, json) {
                warn!("hymnal: could not save offline copy: {}", err);
            }
        }
        Err(err) => warn!("hymnal: could not serialize hymns: {}", err),
    }
}

/// Three well-known hymns for a first launch with no connection at all.
fn fallback_hymns() -> Vec<Hymn> {
    vec![
        Hymn {
            number: 1,
            title: "Chuvas de Graça".to_string(),
            lyrics: "Deus prometeu com certeza\nChuvas de graça mandar;\nEle nos dá fortaleza,\nE ricas bênçãos sem par.\n\n[Refrão]\nChuvas de graça,\nChuvas pedimos, Senhor;\nManda-nos chuvas constantes,\nChuvas do Consolador.".to_string(),
        },
        Hymn {
            number: 39,
            title: "Alvo Mais Que a Neve".to_string(),
            lyrics: "Bendito seja o Cordeiro,\nQue na cruz por nós padeceu!\nBendito seja o Seu sangue,\nQue por nós, ali Ele verteu!\n\n[Refrão]\nAlvo mais que a neve!\nAlvo mais que a neve!\nSim, nesse sangue lavado,\nMais alvo que a neve serei.".to_string(),
        },
        Hymn {
            number: 126,
            title: "Bem-Aventurança".to_string(),
            lyrics: "Bem-aventurado o que confia\nNo Senhor, como fez Abraão;\nEle creu, ainda que não via,\nE, assim, a fé não foi em vão.".to_string(),
        },
    ]
}
