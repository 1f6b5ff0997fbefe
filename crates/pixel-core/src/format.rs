//! Pixel layouts accepted from callers and produced for encoders.

use std::fmt;
use std::str::FromStr;

use framerec_common::error::FramerecError;
use serde::{Deserialize, Serialize};

/// Interleaved layout of the buffers handed to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// 8-bit R, G, B (24 bits per pixel).
    #[default]
    Rgb24,
    /// 8-bit B, G, R, A (32 bits per pixel). Alpha is ignored.
    Bgra32,
}

impl SourceFormat {
    /// Bytes occupied by one pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Bgra32 => 4,
        }
    }

    /// Byte offsets of the red, green and blue samples inside a pixel.
    pub fn rgb_offsets(self) -> (usize, usize, usize) {
        match self {
            Self::Rgb24 => (0, 1, 2),
            Self::Bgra32 => (2, 1, 0),
        }
    }

    /// Row stride of a tightly packed buffer.
    pub fn stride(self, width: u32) -> usize {
        width as usize * self.bytes_per_pixel()
    }

    /// Size in bytes of a tightly packed frame.
    pub fn frame_size(self, width: u32, rows: u32) -> usize {
        self.stride(width) * rows as usize
    }

    /// Pixel format name as ffmpeg spells it.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Rgb24 => "rgb24",
            Self::Bgra32 => "bgra",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb24 => f.write_str("rgb24"),
            Self::Bgra32 => f.write_str("bgra32"),
        }
    }
}

impl FromStr for SourceFormat {
    type Err = FramerecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb24" | "rgb" => Ok(Self::Rgb24),
            "bgra32" | "bgra" => Ok(Self::Bgra32),
            other => Err(FramerecError::config(format!(
                "Unknown source format '{other}' (expected rgb24 or bgra32)"
            ))),
        }
    }
}

/// Planar layout required by the encoder backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlanarFormat {
    /// YUV 4:2:0, three planes, chroma at half resolution in both axes.
    #[default]
    Yuv420p,
}

impl PlanarFormat {
    /// Number of planes.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Yuv420p => 3,
        }
    }

    /// Width and height of plane `index` for a frame of the given size.
    ///
    /// Chroma dimensions round up so odd sizes keep their last column/row.
    pub fn plane_dimensions(self, index: usize, width: u32, height: u32) -> (u32, u32) {
        match (self, index) {
            (Self::Yuv420p, 0) => (width, height),
            (Self::Yuv420p, _) => (width.div_ceil(2), height.div_ceil(2)),
        }
    }

    /// Size in bytes of a tightly packed frame.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        (0..self.plane_count())
            .map(|i| {
                let (w, h) = self.plane_dimensions(i, width, height);
                w as usize * h as usize
            })
            .sum()
    }

    /// Pixel format name as ffmpeg spells it.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
        }
    }
}
