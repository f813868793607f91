mod devices;
mod local_track;
mod media_manager;
mod synthetic;

pub use devices::{MediaConstraints, MediaDevices};
pub use local_track::{LOCAL_STREAM_ID, LocalTrack, TrackKind, TrackSource};
pub use media_manager::{LocalMediaManager, LocalMediaState, MediaChange};
pub use synthetic::{SyntheticDevices, SyntheticMediaConfig};
