use crate::model::user::UserId;
use serde::{Deserialize, Serialize};

/// A remote room member as announced by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    #[serde(rename = "userName")]
    pub display_name: String,
    #[serde(default = "enabled")]
    pub video_enabled: bool,
    #[serde(default = "enabled")]
    pub audio_enabled: bool,
    #[serde(default)]
    pub screen_sharing: bool,
}

fn enabled() -> bool {
    true
}

impl Participant {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            video_enabled: true,
            audio_enabled: true,
            screen_sharing: false,
        }
    }
}
