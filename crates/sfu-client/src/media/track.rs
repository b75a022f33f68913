//! Local and remote media track handles

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::types::MediaKind;

/// Settings reported by the platform for a captured track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub device_id: Option<String>,
}

/// Handle to a raw media track
///
/// Clones share the same underlying track. Stopping any clone ends the
/// track for every holder, and producers bound to it observe the end.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: String,
    kind: MediaKind,
    label: String,
    settings: TrackSettings,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

impl MediaTrack {
    /// Create a live track with a random id
    pub fn new(kind: MediaKind, label: impl Into<String>, settings: TrackSettings) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), kind, label, settings)
    }

    /// Create a live track with a known id
    pub fn with_id(
        id: impl Into<String>,
        kind: MediaKind,
        label: impl Into<String>,
        settings: TrackSettings,
    ) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                settings,
                enabled: AtomicBool::new(true),
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn settings(&self) -> &TrackSettings {
        &self.inner.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// End the track. Idempotent.
    pub fn stop(&self) {
        let was_ended = self.inner.ended.send_replace(true);
        if !was_ended {
            debug!(track = %self.inner.id, kind = %self.inner.kind, "Track ended");
        }
    }

    /// Wait until the track ends
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_is_seen_by_clones() {
        let track = MediaTrack::new(MediaKind::Video, "cam", TrackSettings::default());
        let clone = track.clone();

        let waiter = tokio::spawn(async move { clone.ended().await });
        assert!(!track.is_ended());

        track.stop();
        track.stop();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("ended() should resolve after stop")
            .unwrap();
        assert!(track.is_ended());
    }

    #[test]
    fn test_enabled_flag() {
        let track = MediaTrack::with_id("t1", MediaKind::Audio, "mic", TrackSettings::default());
        assert_eq!(track.id(), "t1");
        assert!(track.is_enabled());
        track.set_enabled(false);
        assert!(!track.is_enabled());
    }
}
