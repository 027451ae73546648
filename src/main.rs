mod carousel;
mod config;
mod daily;
mod hymnal;
mod media;
mod netwatch;
mod player;
mod session;
mod ui;

use std::fs::{self, File};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let client = Client::builder()
        .user_agent("capela_tui/0.3.0")
        .timeout(Duration::from_secs(30))
        .build()?;

    let config = config::load_config(&client).await;
    info!(
        church = %config.church_name,
        stream = %config.stream_url,
        "station config loaded"
    );

    println!("🔗 Sintonizando: {}", config.church_name);

    let control = session::start(player::FfmpegBackend, config.stream_url.clone(), 0.5);
    control.toggle_play();

    let (hymns_tx, hymns_rx) = watch::channel(Vec::new());
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
    tokio::spawn(hymnal::hymnal_task(client.clone(), hymns_tx, refresh_rx));

    tokio::spawn(netwatch::connectivity_loop(client.clone(), control.clone()));
    #[cfg(unix)]
    tokio::spawn(netwatch::foreground_loop(control.clone()));
    tokio::spawn(media::media_task(control.clone(), config.church_name.clone()));

    let (slides, daily) = tokio::join!(
        carousel::load_slides(&client, &config.images),
        daily::load_daily_message(&client)
    );

    let church = config.church_name.clone();
    let ui_result = ui::run_ui(control, config, slides, hymns_rx, refresh_tx, daily).await;

    if let Err(e) = ui_result {
        eprintln!("UI error: {:?}", e);
    } else {
        println!("Obrigado por ouvir a rádio {}!", church);
    }

    Ok(())
}

/// Logs go to a file under the cache dir; stdout belongs to the TUI.
fn init_tracing() {
    let Some(dir) = dirs::cache_dir().map(|d| d.join("capela_tui")) else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = File::create(dir.join("capela_tui.log")) else {
        return;
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("capela_tui=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
}
