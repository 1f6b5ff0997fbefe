//! Frame rates, presentation timestamps, and session wall clocks.
//!
//! Presentation timestamps in FrameRec are plain frame indices. The frame
//! rate is only used to parametrize encoder backends and to translate a
//! timestamp into seconds for reporting.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::FramerecError;

/// Frame rate as a rational number (e.g. 30000/1001 for 29.97 fps).
///
/// Deserialization goes through [`FrameRate::new`], so a zero numerator or
/// denominator in a config file is rejected. Values built as struct literals
/// are checked again by [`FrameRate::validate`] wherever a stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFrameRate")]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

#[derive(Deserialize)]
struct RawFrameRate {
    num: u32,
    den: u32,
}

impl TryFrom<RawFrameRate> for FrameRate {
    type Error = FramerecError;

    fn try_from(raw: RawFrameRate) -> Result<Self, Self::Error> {
        Self::new(raw.num, raw.den)
    }
}

impl FrameRate {
    pub const FPS_24: Self = Self::new_unchecked(24, 1);
    pub const FPS_25: Self = Self::new_unchecked(25, 1);
    pub const FPS_30: Self = Self::new_unchecked(30, 1);
    pub const FPS_50: Self = Self::new_unchecked(50, 1);
    pub const FPS_60: Self = Self::new_unchecked(60, 1);
    pub const FPS_29_97: Self = Self::new_unchecked(30000, 1001);

    /// Create a frame rate, rejecting a zero numerator or denominator.
    pub fn new(num: u32, den: u32) -> Result<Self, FramerecError> {
        if num == 0 || den == 0 {
            return Err(FramerecError::config(format!(
                "Invalid frame rate {num}/{den}: numerator and denominator must be non-zero"
            )));
        }
        Ok(Self { num, den })
    }

    const fn new_unchecked(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Check a rate that may have been built without [`FrameRate::new`].
    pub fn validate(self) -> Result<Self, FramerecError> {
        Self::new(self.num, self.den)
    }

    /// Whole frames per second.
    pub fn fps(self) -> u32 {
        self.num / self.den
    }

    /// Frames per second as a float.
    pub fn fps_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        self.den as f64 / self.num as f64
    }

    /// Convert a frame-index timestamp into seconds.
    pub fn pts_to_secs(self, pts: i64) -> f64 {
        pts as f64 * self.frame_duration_secs()
    }

    /// Encoder time base (the reciprocal of the rate).
    pub fn time_base(self) -> (u32, u32) {
        (self.den, self.num)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_30
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl FromStr for FrameRate {
    type Err = FramerecError;

    /// Accepts `"30"` or `"30000/1001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| FramerecError::config(format!("Invalid frame rate '{s}': {e}")))
        };
        match s.split_once('/') {
            Some((num, den)) => Self::new(parse(num)?, parse(den)?),
            None => Self::new(parse(s)?, 1),
        }
    }
}

/// Wall clock anchored at the moment a recording session opened.
#[derive(Debug, Clone)]
pub struct SessionClock {
    epoch: Instant,
    epoch_wall: chrono::DateTime<chrono::Utc>,
}

impl SessionClock {
    /// Start a clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now(),
        }
    }

    /// Seconds elapsed since the session opened.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at which the session opened.
    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.epoch_wall
    }

    /// Start time as an RFC 3339 string.
    pub fn started_at_rfc3339(&self) -> String {
        self.epoch_wall.to_rfc3339()
    }
}
