//! Chunked transfer engine
//!
//! The data channel carries an undifferentiated byte stream: the sender
//! concatenates all files in manifest order, the receiver cuts the stream
//! back into files using the byte lengths announced up front. Chunk
//! boundaries carry no meaning on either side.

pub mod receiver;
pub mod sender;

pub use receiver::{ChunkReceiver, CompletedFile};
pub use sender::{ChunkSender, SendFile};
