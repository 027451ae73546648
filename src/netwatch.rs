//! Connectivity and foreground watchers.
//!
//! Neither watcher knows anything about playback state; they only nudge
//! the session, which decides for itself whether a nudge matters.

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::config;
use crate::session::SessionControl;

const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Remembers the last probe result and reports down-to-up edges.
#[derive(Default)]
pub struct LinkMonitor {
    last: Option<bool>,
}

impl LinkMonitor {
    /// Returns true only when the link comes back after being seen down.
    pub fn observe(&mut self, up: bool) -> bool {
        let recovered = self.last == Some(false) && up;
        self.last = Some(up);
        recovered
    }
}

/// Periodically probes the config host and nudges the session when the
/// connection comes back.
pub async fn connectivity_loop(client: reqwest::Client, control: SessionControl) {
    let mut monitor = LinkMonitor::default();
    let mut ticker = interval(PROBE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let up = probe(&client, config::CONFIG_URL).await;
        if monitor.observe(up) {
            info!("netwatch: connection is back, nudging the session");
            control.network_recovered();
        }
    }
}

/// Any HTTP response means the network path works; only transport errors
/// count as offline.
async fn probe(client: &reqwest::Client, url: &str) -> bool {
    client.head(url).send().await.is_ok()
}

/// Reports SIGCONT, which is what coming back from `fg` looks like. A
/// paused session ignores the nudge; one waiting out a retry reconnects.
#[cfg(unix)]
pub async fn foreground_loop(control: SessionControl) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut continued = match signal(SignalKind::from_raw(libc::SIGCONT)) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("netwatch: cannot watch SIGCONT: {}", err);
            return;
        }
    };
    while continued.recv().await.is_some() {
        info!("netwatch: resumed in foreground");
        control.foregrounded();
    }
}
