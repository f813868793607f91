use crate::error::MediaError;
use crate::media::{LocalTrack, MediaConstraints, MediaDevices};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Local capture state. The outgoing video slot holds either the camera or the
/// screen track, never both.
#[derive(Debug, Clone, Default)]
pub struct LocalMediaState {
    pub video_track: Option<Arc<LocalTrack>>,
    pub audio_track: Option<Arc<LocalTrack>>,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
}

/// Change the orchestrator must propagate to peer sessions and the relay.
#[derive(Debug, Clone)]
pub enum MediaChange {
    VideoToggled(bool),
    AudioToggled(bool),
    ScreenShareStarted(Arc<LocalTrack>),
    ScreenShareStopped(Option<Arc<LocalTrack>>),
}

pub struct LocalMediaManager<D> {
    devices: D,
    state: LocalMediaState,
    camera: Option<Arc<LocalTrack>>,
    screen: Option<Arc<LocalTrack>>,
    camera_wanted: bool,
}

impl<D: MediaDevices> LocalMediaManager<D> {
    pub fn new(devices: D) -> Self {
        Self {
            devices,
            state: LocalMediaState::default(),
            camera: None,
            screen: None,
            camera_wanted: false,
        }
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    pub fn state(&self) -> &LocalMediaState {
        &self.state
    }

    pub fn is_acquired(&self) -> bool {
        self.state.video_track.is_some() || self.state.audio_track.is_some()
    }

    /// Opens camera and microphone according to `constraints`.
    pub async fn acquire(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<LocalMediaState, MediaError> {
        self.release();

        let camera = if constraints.video {
            Some(self.devices.open_camera().await?)
        } else {
            None
        };

        let microphone = if constraints.audio {
            match self.devices.open_microphone().await {
                Ok(track) => Some(track),
                Err(e) => {
                    if let Some(camera) = &camera {
                        camera.stop();
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            video = camera.is_some(),
            audio = microphone.is_some(),
            "Local media acquired"
        );

        self.camera_wanted = constraints.video;
        self.camera = camera.clone();
        self.state = LocalMediaState {
            video_enabled: camera.is_some(),
            audio_enabled: microphone.is_some(),
            video_track: camera,
            audio_track: microphone,
            screen_sharing: false,
        };

        Ok(self.state.clone())
    }

    /// The track currently occupying the outgoing video slot.
    pub fn outgoing_video(&self) -> Option<Arc<LocalTrack>> {
        self.state.video_track.clone()
    }

    pub fn outgoing_audio(&self) -> Option<Arc<LocalTrack>> {
        self.state.audio_track.clone()
    }

    /// Flips the enabled flag on the outgoing video without touching the
    /// attached track identity.
    pub fn set_video_enabled(&mut self, enabled: bool) -> MediaChange {
        self.state.video_enabled = enabled;
        if let Some(camera) = &self.camera {
            camera.set_enabled(enabled);
        }
        if let Some(track) = &self.state.video_track {
            track.set_enabled(enabled);
        }
        debug!("Local video enabled = {}", enabled);
        MediaChange::VideoToggled(enabled)
    }

    pub fn set_audio_enabled(&mut self, enabled: bool) -> MediaChange {
        self.state.audio_enabled = enabled;
        if let Some(track) = &self.state.audio_track {
            track.set_enabled(enabled);
        }
        debug!("Local audio enabled = {}", enabled);
        MediaChange::AudioToggled(enabled)
    }

    /// Puts a display capture into the video slot. The camera track is kept
    /// aside so stopping the share restores the same instance.
    pub async fn start_screen_share(&mut self) -> Result<MediaChange, MediaError> {
        if let Some(screen) = &self.screen {
            return Ok(MediaChange::ScreenShareStarted(screen.clone()));
        }

        let screen = self.devices.open_display().await?;
        info!("Screen share started with track {}", screen.id());
        screen.set_enabled(self.state.video_enabled);

        self.screen = Some(screen.clone());
        self.state.video_track = Some(screen.clone());
        self.state.screen_sharing = true;

        Ok(MediaChange::ScreenShareStarted(screen))
    }

    /// Ends the display capture and puts the camera back into the video slot.
    pub async fn stop_screen_share(&mut self) -> Result<MediaChange, MediaError> {
        let Some(screen) = self.screen.take() else {
            return Ok(MediaChange::ScreenShareStopped(self.state.video_track.clone()));
        };
        screen.stop();
        self.state.screen_sharing = false;

        let camera = match self.camera.take() {
            Some(camera) if !camera.is_ended() => Some(camera),
            _ if self.camera_wanted => {
                warn!("Camera track ended during screen share, reopening");
                match self.devices.open_camera().await {
                    Ok(camera) => Some(camera),
                    Err(e) => {
                        self.state.video_track = None;
                        return Err(e);
                    }
                }
            }
            _ => None,
        };

        if let Some(camera) = &camera {
            camera.set_enabled(self.state.video_enabled);
        }
        self.camera = camera.clone();
        self.state.video_track = camera.clone();
        info!("Screen share stopped");

        Ok(MediaChange::ScreenShareStopped(camera))
    }

    /// Whether `track_id` is the display capture currently being shared.
    pub fn is_current_screen(&self, track_id: &str) -> bool {
        self.screen.as_ref().is_some_and(|s| s.id() == track_id)
    }

    /// Stops every local track. Idempotent.
    pub fn release(&mut self) {
        let tracks = [
            self.screen.take(),
            self.camera.take(),
            self.state.video_track.take(),
            self.state.audio_track.take(),
        ];
        let mut stopped = 0;
        for track in tracks.into_iter().flatten() {
            if !track.is_ended() {
                track.stop();
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!("Released {} local tracks", stopped);
        }
        self.state = LocalMediaState::default();
    }
}
