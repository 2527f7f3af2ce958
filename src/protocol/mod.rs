//! Wire protocol for the broker control plane
//!
//! Control and proxy connections open with exactly one framed message;
//! afterwards the control connection carries bare heartbeat bytes and a
//! proxy connection carries raw spliced traffic.

mod codec;
mod types;

pub use codec::{read_frame, write_frame};
pub use types::{
    Flag, Frame, HeartbeatReply, FRAME_MAGIC, HEARTBEAT_PING, HELLO_ACK, HELLO_NACK,
    MAX_FRAME_PAYLOAD,
};
