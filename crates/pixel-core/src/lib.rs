//! FrameRec Pixel Core
//!
//! Pixel-level stages that run before a frame reaches an encoder:
//! - Interleaved source and planar target formats
//! - Reusable planar frame buffers
//! - In-place vertical flip
//! - RGB/BGRA to YUV 4:2:0 color conversion (libswscale with the `libav`
//!   feature, a portable fixed-point kernel otherwise)

pub mod convert;
pub mod flip;
pub mod format;
pub mod frame;
#[cfg(feature = "libav")]
pub mod sws;

pub use convert::{default_kernel, ColorConverter, ScaleKernel, SoftwareKernel};
pub use flip::{flip_vertical, RowFlipper};
pub use format::{PlanarFormat, SourceFormat};
pub use frame::{PlanarFrame, Plane};
#[cfg(feature = "libav")]
pub use sws::SwsKernel;
