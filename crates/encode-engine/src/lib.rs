//! FrameRec Encode Engine
//!
//! Turns a sequence of raw pixel buffers into an encoded bitstream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Recorder                        │
//! │  ┌────────┐   ┌───────────┐   ┌─────────┐   ┌──────┐ │
//! │  │  Flip  │──▶│  Convert  │──▶│ Encoder │──▶│ Sink │ │
//! │  │ (opt.) │   │ RGB→I420  │   │ backend │   │      │ │
//! │  └────────┘   └───────────┘   └────┬────┘   └──▲───┘ │
//! │                                    │ drain     │     │
//! │                                    └───────────┘     │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod session;
pub mod sink;

pub use backend::{
    BackendKind, EncodedPacket, EncoderBackend, EncoderHandle, EncoderParams, FfmpegBackend,
    RawBackend,
};
#[cfg(feature = "libav")]
pub use backend::LibavBackend;
pub use session::*;
pub use sink::{Destination, FileSink, MemorySink, OutputSink, StreamSink};
