//! Interleaved RGB to planar YUV 4:2:0 conversion.
//!
//! The conversion itself is delegated to a [`ScaleKernel`]. The built-in
//! [`SoftwareKernel`] uses the BT.601 limited-range matrix in 8.8 fixed point,
//! which is what libswscale applies by default for `rgb24 -> yuv420p`.
//! [`ColorConverter`] wraps a kernel for one fixed geometry and checks that
//! the kernel really processed every row.

use framerec_common::error::{FramerecError, FramerecResult};

use crate::format::{PlanarFormat, SourceFormat};
use crate::frame::PlanarFrame;

/// A color conversion kernel.
pub trait ScaleKernel: Send {
    /// Kernel name for logs.
    fn name(&self) -> &str;

    /// Convert `rows` rows of interleaved `src` into `dst`.
    ///
    /// Returns the number of source rows processed.
    fn convert(
        &mut self,
        src: &[u8],
        src_stride: usize,
        src_format: SourceFormat,
        dst: &mut PlanarFrame,
        width: u32,
        rows: u32,
    ) -> usize;
}

/// Portable fixed-point BT.601 kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareKernel;

#[inline]
fn luma(r: i32, g: i32, b: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8
}

#[inline]
fn chroma_u(r: i32, g: i32, b: i32) -> u8 {
    (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8
}

#[inline]
fn chroma_v(r: i32, g: i32, b: i32) -> u8 {
    (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8
}

impl ScaleKernel for SoftwareKernel {
    fn name(&self) -> &str {
        "software-bt601"
    }

    fn convert(
        &mut self,
        src: &[u8],
        src_stride: usize,
        src_format: SourceFormat,
        dst: &mut PlanarFrame,
        width: u32,
        rows: u32,
    ) -> usize {
        let bpp = src_format.bytes_per_pixel();
        let (ro, go, bo) = src_format.rgb_offsets();
        let (y_plane, u_plane, v_plane) = dst.yuv_planes_mut();
        let width = width as usize;

        let pixel = |y: usize, x: usize| -> (i32, i32, i32) {
            let base = y * src_stride + x * bpp;
            (
                src[base + ro] as i32,
                src[base + go] as i32,
                src[base + bo] as i32,
            )
        };

        for y in 0..rows as usize {
            let out = y_plane.row_mut(y as u32);
            for (x, sample) in out.iter_mut().enumerate().take(width) {
                let (r, g, b) = pixel(y, x);
                *sample = luma(r, g, b);
            }
        }

        let chroma_rows = (rows as usize).div_ceil(2);
        let chroma_cols = width.div_ceil(2);
        for cy in 0..chroma_rows {
            let y0 = cy * 2;
            let y1 = (y0 + 1).min(rows as usize - 1);
            let u_row = u_plane.row_mut(cy as u32);
            let v_row = v_plane.row_mut(cy as u32);
            for cx in 0..chroma_cols {
                let x0 = cx * 2;
                let x1 = (x0 + 1).min(width - 1);

                let mut sum = (0i32, 0i32, 0i32);
                for (sy, sx) in [(y0, x0), (y0, x1), (y1, x0), (y1, x1)] {
                    let (r, g, b) = pixel(sy, sx);
                    sum.0 += r;
                    sum.1 += g;
                    sum.2 += b;
                }
                // Edge pixels are replicated, so every block averages four samples.
                let (r, g, b) = ((sum.0 + 2) / 4, (sum.1 + 2) / 4, (sum.2 + 2) / 4);
                u_row[cx] = chroma_u(r, g, b);
                v_row[cx] = chroma_v(r, g, b);
            }
        }

        rows as usize
    }
}

/// The kernel a recorder uses when none is supplied: libswscale when built
/// with the `libav` feature and FFmpeg initializes, [`SoftwareKernel`]
/// otherwise.
pub fn default_kernel() -> Box<dyn ScaleKernel> {
    #[cfg(feature = "libav")]
    match crate::sws::SwsKernel::new() {
        Ok(kernel) => return Box::new(kernel),
        Err(e) => tracing::warn!(error = %e, "libswscale unavailable, using software kernel"),
    }
    Box::new(SoftwareKernel)
}

/// Converts interleaved frames of one fixed geometry into planar frames.
pub struct ColorConverter {
    kernel: Box<dyn ScaleKernel>,
    source_format: SourceFormat,
    target_format: PlanarFormat,
    width: u32,
    rows: u32,
}

impl ColorConverter {
    /// Configure a converter for `width x rows` frames in `source_format`.
    pub fn new(
        kernel: Box<dyn ScaleKernel>,
        source_format: SourceFormat,
        width: u32,
        rows: u32,
    ) -> FramerecResult<Self> {
        if width == 0 || rows == 0 {
            return Err(FramerecError::allocation(format!(
                "Cannot create a converter for {width}x{rows} frames"
            )));
        }
        tracing::debug!(
            kernel = kernel.name(),
            %source_format,
            width,
            rows,
            "Color converter configured"
        );
        Ok(Self {
            kernel,
            source_format,
            target_format: PlanarFormat::Yuv420p,
            width,
            rows,
        })
    }

    /// Software converter.
    pub fn software(source_format: SourceFormat, width: u32, rows: u32) -> FramerecResult<Self> {
        Self::new(Box::new(SoftwareKernel), source_format, width, rows)
    }

    pub fn source_format(&self) -> SourceFormat {
        self.source_format
    }

    pub fn target_format(&self) -> PlanarFormat {
        self.target_format
    }

    /// Give the kernel back once the converter is released.
    pub fn into_kernel(self) -> Box<dyn ScaleKernel> {
        self.kernel
    }

    /// Convert `src` into `dst`, which must match the configured geometry.
    ///
    /// A kernel that reports fewer (or more) rows than requested indicates a
    /// configuration bug and yields a [`FramerecError::Conversion`].
    pub fn convert(&mut self, src: &[u8], dst: &mut PlanarFrame) -> FramerecResult<()> {
        let expected = self.source_format.frame_size(self.width, self.rows);
        if src.len() != expected {
            return Err(FramerecError::FrameSize {
                expected,
                actual: src.len(),
            });
        }
        if dst.width() != self.width
            || dst.height() != self.rows
            || dst.format() != self.target_format
        {
            return Err(FramerecError::conversion(format!(
                "Destination frame is {}x{} {:?}, converter expects {}x{} {:?}",
                dst.width(),
                dst.height(),
                dst.format(),
                self.width,
                self.rows,
                self.target_format
            )));
        }

        let stride = self.source_format.stride(self.width);
        let processed = self.kernel.convert(
            src,
            stride,
            self.source_format,
            dst,
            self.width,
            self.rows,
        );
        if processed != self.rows as usize {
            return Err(FramerecError::conversion(format!(
                "Scaling kernel '{}' returned {processed} rows, expected {}",
                self.kernel.name(),
                self.rows
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ColorConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorConverter")
            .field("kernel", &self.kernel.name())
            .field("source_format", &self.source_format)
            .field("width", &self.width)
            .field("rows", &self.rows)
            .finish()
    }
}
