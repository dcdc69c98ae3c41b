//! Parley wire protocol.
//!
//! Every protocol unit on the TCP stream is a frame:
//!
//! ```text
//! ┌───────────────┬─────────────────┬─────────────────────┐
//! │ type : u16 BE │ length : u16 BE │ payload : <length>  │
//! └───────────────┴─────────────────┴─────────────────────┘
//! ```
//!
//! Payloads are UTF-8 JSON. Control frames (the account-kicked notice)
//! carry a zero-length payload.

pub mod codec;
pub mod envelope;
pub mod types;

pub use codec::{CodecError, Frame, FrameBuffer, HEADER_LEN, MAX_PAYLOAD_LEN, encode_frame};
