pub mod memory_relay;

pub use memory_relay::*;
pub use mock_transport::*;
pub use recording_channel::*;
pub use test_peer::*;

use tracing::Level;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}
