use crate::model::user::UserId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user_id: UserId,
    pub user_name: String,
    pub message: String,
    /// Milliseconds since the Unix epoch, stamped by the sender.
    pub timestamp: u64,
}
