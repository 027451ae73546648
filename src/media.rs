//! OS media-key bridge.
//!
//! Publishes the session state over MPRIS (or the platform equivalent) and
//! turns media-key presses into session nudges. Everything here is
//! best-effort: a headless system without a D-Bus session just logs a
//! warning and the bridge stays out of the way.

use souvlaki::{MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, PlatformConfig};
use tracing::{debug, warn};

use crate::session::{SessionControl, Status};

/// Keeps the OS informed and forwards media keys until the session ends.
pub async fn media_task(session: SessionControl, station: String) {
    let mut controls = match create_controls(&session) {
        Some(controls) => controls,
        None => return,
    };

    if let Err(err) = controls.set_metadata(MediaMetadata {
        title: Some(&station),
        artist: Some("Ao vivo"),
        ..Default::default()
    }) {
        debug!("media: could not publish metadata: {:?}", err);
    }

    let mut status_rx = session.subscribe();
    let mut last: Option<Status> = None;
    loop {
        let status = status_rx.borrow_and_update().status;
        if last != Some(status) {
            last = Some(status);
            if let Err(err) = controls.set_playback(map_playback(status)) {
                debug!("media: could not publish playback state: {:?}", err);
            }
        }
        if status_rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(target_os = "windows")]
fn create_controls(_session: &SessionControl) -> Option<MediaControls> {
    // souvlaki needs a window handle there and a terminal app has none
    warn!("media: OS media controls are not wired up on windows");
    None
}

#[cfg(not(target_os = "windows"))]
fn create_controls(session: &SessionControl) -> Option<MediaControls> {
    let config = PlatformConfig {
        dbus_name: "capela_tui",
        display_name: "Capela TUI",
        hwnd: None,
    };
    let mut controls = match MediaControls::new(config) {
        Ok(controls) => controls,
        Err(err) => {
            warn!("media: OS media controls unavailable: {:?}", err);
            return None;
        }
    };

    let actions = session.clone();
    if let Err(err) = controls.attach(move |event| {
        if should_toggle(&event, actions.view().status) {
            actions.toggle_play();
        }
    }) {
        warn!("media: could not attach media-key handler: {:?}", err);
        return None;
    }
    Some(controls)
}

/// Whether a media-key event should flip the session, given where it is.
/// Stop behaves like pause; tearing the session down is reserved for quit.
fn should_toggle(event: &MediaControlEvent, status: Status) -> bool {
    match event {
        MediaControlEvent::Play => {
            matches!(status, Status::Paused | Status::Idle | Status::Errored)
        }
        MediaControlEvent::Pause | MediaControlEvent::Stop => status == Status::Playing,
        MediaControlEvent::Toggle => true,
        _ => false,
    }
}

fn map_playback(status: Status) -> MediaPlayback {
    match status {
        // a reconnect attempt still counts as playing from the desk's view
        Status::Playing | Status::Connecting => MediaPlayback::Playing { progress: None },
        Status::Paused => MediaPlayback::Paused { progress: None },
        Status::Idle | Status::Errored => MediaPlayback::Stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_engages_only_when_not_already_active() {
        assert!(should_toggle(&MediaControlEvent::Play, Status::Paused));
        assert!(should_toggle(&MediaControlEvent::Play, Status::Idle));
        assert!(should_toggle(&MediaControlEvent::Play, Status::Errored));
        assert!(!should_toggle(&MediaControlEvent::Play, Status::Playing));
        assert!(!should_toggle(&MediaControlEvent::Play, Status::Connecting));
    }

    #[test]
    fn pause_and_stop_only_act_on_live_playback() {
        assert!(should_toggle(&MediaControlEvent::Pause, Status::Playing));
        assert!(!should_toggle(&MediaControlEvent::Pause, Status::Paused));
        assert!(should_toggle(&MediaControlEvent::Stop, Status::Playing));
        assert!(!should_toggle(&MediaControlEvent::Stop, Status::Idle));
        assert!(!should_toggle(&MediaControlEvent::Stop, Status::Errored));
    }

    #[test]
    fn toggle_always_passes_through() {
        assert!(should_toggle(&MediaControlEvent::Toggle, Status::Playing));
        assert!(should_toggle(&MediaControlEvent::Toggle, Status::Paused));
        assert!(should_toggle(&MediaControlEvent::Toggle, Status::Connecting));
    }

    #[test]
    fn unrelated_events_are_dropped() {
        assert!(!should_toggle(&MediaControlEvent::Next, Status::Playing));
        assert!(!should_toggle(&MediaControlEvent::Previous, Status::Paused));
    }

    #[test]
    fn session_states_map_onto_platform_playback() {
        assert!(matches!(
            map_playback(Status::Playing),
            MediaPlayback::Playing { .. }
        ));
        assert!(matches!(
            map_playback(Status::Connecting),
            MediaPlayback::Playing { .. }
        ));
        assert!(matches!(
            map_playback(Status::Paused),
            MediaPlayback::Paused { .. }
        ));
        assert!(matches!(map_playback(Status::Idle), MediaPlayback::Stopped));
        assert!(matches!(
            map_playback(Status::Errored),
            MediaPlayback::Stopped
        ));
    }
}
