use crate::error::MediaError;
use crate::media::LocalTrack;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Capture backend the media manager opens tracks from.
#[async_trait]
pub trait MediaDevices: Send + Sync + 'static {
    async fn open_camera(&self) -> Result<Arc<LocalTrack>, MediaError>;

    async fn open_microphone(&self) -> Result<Arc<LocalTrack>, MediaError>;

    /// Opens a display capture. Cancelling the picker yields
    /// [`MediaError::ScreenShareDenied`].
    async fn open_display(&self) -> Result<Arc<LocalTrack>, MediaError>;
}
