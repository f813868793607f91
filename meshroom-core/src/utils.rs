pub const DEFAULT_STUN_ADDR: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_STUN_ADDR_2: &str = "stun:stun1.l.google.com:19302";
pub const DEFAULT_STUN_ADDR_3: &str = "stun:stun2.l.google.com:19302";
pub const DEFAULT_STUN_ADDR_4: &str = "stun:stun3.l.google.com:19302";

/// Maximum number of participants the relay admits into one room.
pub const ROOM_CAPACITY: usize = 10;

/// Message the relay attaches to `room-error` when the room is at capacity.
pub const ROOM_FULL_MESSAGE: &str = "Room is full";

/// Milliseconds since the Unix epoch, used for chat timestamps.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
