use crate::error::MediaError;
use crate::media::{LocalTrack, MediaDevices, TrackSource};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use webrtc::media::Sample;

const PLACEHOLDER_FRAME: &[u8] = &[0u8; 160];

#[derive(Debug, Clone, Default)]
pub struct SyntheticMediaConfig {
    pub deny_camera: bool,
    pub deny_microphone: bool,
    pub deny_display: bool,
    /// Interval between placeholder samples; `None` opens silent tracks.
    pub frame_interval: Option<Duration>,
}

struct SyntheticInner {
    config: SyntheticMediaConfig,
    deny_display: AtomicBool,
    camera_opens: AtomicUsize,
    display_opens: AtomicUsize,
    last_display: Mutex<Option<Arc<LocalTrack>>>,
}

/// Device backend without hardware: tracks carry placeholder samples.
#[derive(Clone)]
pub struct SyntheticDevices {
    inner: Arc<SyntheticInner>,
}

impl SyntheticDevices {
    pub fn new(config: SyntheticMediaConfig) -> Self {
        Self {
            inner: Arc::new(SyntheticInner {
                deny_display: AtomicBool::new(config.deny_display),
                config,
                camera_opens: AtomicUsize::new(0),
                display_opens: AtomicUsize::new(0),
                last_display: Mutex::new(None),
            }),
        }
    }

    pub fn set_deny_display(&self, deny: bool) {
        self.inner.deny_display.store(deny, Ordering::Release);
    }

    pub fn camera_opens(&self) -> usize {
        self.inner.camera_opens.load(Ordering::Acquire)
    }

    pub fn display_opens(&self) -> usize {
        self.inner.display_opens.load(Ordering::Acquire)
    }

    /// Simulates the user pressing "stop sharing" in the browser chrome.
    pub async fn end_display_capture(&self) -> bool {
        match self.inner.last_display.lock().await.take() {
            Some(track) => {
                track.stop();
                true
            }
            None => false,
        }
    }

    fn open(&self, source: TrackSource) -> Arc<LocalTrack> {
        let track = LocalTrack::new(source);
        debug!("Opened synthetic {} track {}", source.label(), track.id());

        if let Some(interval) = self.inner.config.frame_interval {
            tokio::spawn(pump_samples(track.clone(), interval));
        }
        track
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new(SyntheticMediaConfig::default())
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn open_camera(&self) -> Result<Arc<LocalTrack>, MediaError> {
        if self.inner.config.deny_camera {
            return Err(MediaError::PermissionDenied("camera"));
        }
        self.inner.camera_opens.fetch_add(1, Ordering::AcqRel);
        Ok(self.open(TrackSource::Camera))
    }

    async fn open_microphone(&self) -> Result<Arc<LocalTrack>, MediaError> {
        if self.inner.config.deny_microphone {
            return Err(MediaError::PermissionDenied("microphone"));
        }
        Ok(self.open(TrackSource::Microphone))
    }

    async fn open_display(&self) -> Result<Arc<LocalTrack>, MediaError> {
        if self.inner.deny_display.load(Ordering::Acquire) {
            return Err(MediaError::ScreenShareDenied);
        }
        self.inner.display_opens.fetch_add(1, Ordering::AcqRel);
        let track = self.open(TrackSource::Screen);
        *self.inner.last_display.lock().await = Some(track.clone());
        Ok(track)
    }
}

async fn pump_samples(track: Arc<LocalTrack>, interval: Duration) {
    let mut ended = track.subscribe_ended();
    let mut ticker = tokio::time::interval(interval);
    let rtc = track.rtc_track();

    loop {
        tokio::select! {
            _ = async { let _ = ended.wait_for(|e| *e).await; } => break,
            _ = ticker.tick() => {
                if !track.is_enabled() {
                    continue;
                }
                let sample = Sample {
                    data: Bytes::from_static(PLACEHOLDER_FRAME),
                    duration: interval,
                    ..Default::default()
                };
                if let Err(e) = rtc.write_sample(&sample).await {
                    trace!("Dropped sample on {}: {}", track.id(), e);
                }
            }
        }
    }

    debug!("Sample pump for {} stopped", track.id());
}
