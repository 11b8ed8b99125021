//! Grid wire codec — the on-the-wire shape of a kernel message.
//!
//! Every message travelling between Grid kernels is a single CBOR data item:
//!
//! ```text
//! tag(0x67726964 /* "grid" */) [ protocol: bstr, payload: bstr ]
//! ```
//!
//! Frames are self-delimiting, so a connection carries a plain sequence of
//! them with no extra length header.
//!
//! ## Layout
//!
//! - **message**: `Message`, `encode` / `decode` of a single frame
//! - **frame**: splitting a byte stream into frames (`FrameReader`, `write_message`)
//! - **mnemonic**: big-endian conversion between short ASCII labels and `u64`
//! - **protocol**: `ProtocolId`, the opaque key handlers subscribe to

pub mod error;
pub mod frame;
pub mod message;
pub mod mnemonic;
pub mod protocol;

pub use error::WireError;
pub use frame::{frame_len, write_message, FrameReader, MAX_FRAME_SIZE};
pub use message::{decode, encode, Message, GRID_TAG, GRID_TAG_NAME};
pub use mnemonic::{num_to_string, string_to_num};
pub use protocol::ProtocolId;
