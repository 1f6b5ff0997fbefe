//! Encoder backends.
//!
//! A backend resolves and configures an encoder instance; the resulting
//! [`EncoderHandle`] accepts planar frames and may or may not hand back a
//! packet for each one. Encoders are allowed to hold frames back (B-frames,
//! rate-control look-ahead), so output is not 1:1 with input. Submitting
//! `None` asks the encoder to flush: each call then returns one buffered
//! packet, and `Ok(None)` means nothing is pending any more.

use std::fmt;
use std::str::FromStr;

use framerec_common::error::{FramerecError, FramerecResult};
use framerec_common::timebase::FrameRate;
use framerec_pixel_core::{PlanarFormat, PlanarFrame};
use serde::{Deserialize, Serialize};

pub mod ffmpeg;
#[cfg(feature = "libav")]
pub mod libav;
pub mod raw;

pub use self::ffmpeg::FfmpegBackend;
#[cfg(feature = "libav")]
pub use self::libav::LibavBackend;
pub use self::raw::RawBackend;

/// Parameters an encoder instance is configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub pixel_format: PlanarFormat,
    /// Target bit rate in bits per second.
    pub bit_rate: u64,
    /// Allowed deviation from `bit_rate`, in bits.
    pub bit_rate_tolerance: u64,
    /// Keyframe interval in frames.
    pub gop_size: u32,
    pub max_b_frames: u32,
    /// Speed/quality preset.
    pub preset: String,
}

impl EncoderParams {
    /// Parameters with the default rate policy for the given geometry.
    pub fn new(width: u32, height: u32, frame_rate: FrameRate) -> Self {
        let bit_rate = default_bit_rate(width, height, frame_rate);
        Self {
            width,
            height,
            frame_rate,
            pixel_format: PlanarFormat::Yuv420p,
            bit_rate,
            bit_rate_tolerance: bit_rate,
            gop_size: 10,
            max_b_frames: 1,
            preset: "slow".to_string(),
        }
    }
}

/// Bit rate generous enough that the encoder's own rate control decides.
///
/// 0.4 bits per pixel per frame, i.e. 12 bits per pixel per second at 30 fps.
pub fn default_bit_rate(width: u32, height: u32, frame_rate: FrameRate) -> u64 {
    let pixels = width as u64 * height as u64;
    let den = (frame_rate.den as u64).max(1);
    (pixels * frame_rate.num as u64 * 2 / (den * 5)).max(1)
}

/// One unit of encoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    /// Presentation timestamp, when the backend reports one.
    pub pts: Option<i64>,
    pub keyframe: bool,
}

impl EncodedPacket {
    pub fn new(data: Vec<u8>, pts: Option<i64>) -> Self {
        Self {
            data,
            pts,
            keyframe: false,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A configured encoder instance. Dropping it releases the encoder.
pub trait EncoderHandle: Send {
    /// Submit a frame (or `None` to flush) and collect any ready output.
    fn submit(&mut self, frame: Option<&PlanarFrame>) -> FramerecResult<Option<EncodedPacket>>;
}

/// A way of producing encoder instances.
pub trait EncoderBackend: Send {
    /// Backend name.
    fn name(&self) -> &str;

    /// Check if this backend can be used on this system.
    fn is_available(&self) -> bool;

    /// Resolve and configure an encoder instance.
    fn configure(&self, params: &EncoderParams) -> FramerecResult<Box<dyn EncoderHandle>>;
}

/// The backends FrameRec ships with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum BackendKind {
    /// External `ffmpeg` process running libx264.
    Ffmpeg,
    /// In-process libavcodec (requires the `libav` feature).
    Libav,
    /// Uncompressed YUV4MPEG2 output with a simulated look-ahead.
    Raw { lookahead: usize },
}

impl BackendKind {
    /// Instantiate the backend.
    pub fn create(self) -> FramerecResult<Box<dyn EncoderBackend>> {
        match self {
            Self::Ffmpeg => Ok(Box::new(FfmpegBackend::new())),
            #[cfg(feature = "libav")]
            Self::Libav => Ok(Box::new(LibavBackend::new())),
            #[cfg(not(feature = "libav"))]
            Self::Libav => Err(FramerecError::backend_unavailable(
                "libav backend not compiled in (enable the `libav` feature)",
            )),
            Self::Raw { lookahead } => Ok(Box::new(RawBackend::new(lookahead))),
        }
    }

    /// Parse a backend name from configuration, using `raw_lookahead` for `raw`.
    pub fn from_name(name: &str, raw_lookahead: usize) -> FramerecResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(Self::Ffmpeg),
            "libav" => Ok(Self::Libav),
            "raw" => Ok(Self::Raw {
                lookahead: raw_lookahead,
            }),
            other => Err(FramerecError::config(format!(
                "Unknown encoder backend '{other}' (expected ffmpeg, libav or raw)"
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ffmpeg => f.write_str("ffmpeg"),
            Self::Libav => f.write_str("libav"),
            Self::Raw { .. } => f.write_str("raw"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = FramerecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s, RawBackend::DEFAULT_LOOKAHEAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bit_rate_matches_thirty_fps_budget() {
        // 12 bits per pixel at 30 fps
        assert_eq!(
            default_bit_rate(1920, 1080, FrameRate::FPS_30),
            12 * 1920 * 1080
        );
        assert_eq!(
            default_bit_rate(1920, 1080, FrameRate::FPS_60),
            24 * 1920 * 1080
        );
    }

    #[test]
    fn test_default_bit_rate_survives_zero_denominator() {
        let rate = FrameRate { num: 30, den: 0 };
        assert_eq!(default_bit_rate(10, 10, rate), 10 * 10 * 30 * 2 / 5);
    }

    #[test]
    fn test_params_defaults() {
        let params = EncoderParams::new(64, 64, FrameRate::FPS_25);
        assert_eq!(params.gop_size, 10);
        assert_eq!(params.max_b_frames, 1);
        assert_eq!(params.bit_rate, params.bit_rate_tolerance);
        assert_eq!(params.pixel_format, PlanarFormat::Yuv420p);
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("ffmpeg".parse::<BackendKind>().unwrap(), BackendKind::Ffmpeg);
        assert_eq!(
            BackendKind::from_name("RAW", 5).unwrap(),
            BackendKind::Raw { lookahead: 5 }
        );
        assert!("nvenc".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Raw { lookahead: 1 }.to_string(), "raw");
    }

    #[cfg(not(feature = "libav"))]
    #[test]
    fn test_libav_without_feature_is_unavailable() {
        let err = BackendKind::Libav.create().err().unwrap();
        assert!(matches!(err, FramerecError::BackendUnavailable { .. }));
    }
}
