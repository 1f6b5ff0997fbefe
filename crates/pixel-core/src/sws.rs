//! libswscale conversion kernel.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, Flags};
use ffmpeg_next::util::frame::video::Video;

use framerec_common::error::{FramerecError, FramerecResult};

use crate::convert::ScaleKernel;
use crate::format::{PlanarFormat, SourceFormat};
use crate::frame::PlanarFrame;

fn source_pixel(format: SourceFormat) -> Pixel {
    match format {
        SourceFormat::Rgb24 => Pixel::RGB24,
        SourceFormat::Bgra32 => Pixel::BGRA,
    }
}

/// Scaling context plus its staging frames for one geometry.
struct SwsState {
    ctx: Context,
    src: Video,
    dst: Video,
    format: SourceFormat,
    width: u32,
    rows: u32,
}

impl SwsState {
    fn new(format: SourceFormat, width: u32, rows: u32) -> Result<Self, ffmpeg::Error> {
        let pixel = source_pixel(format);
        let ctx = Context::get(
            pixel,
            width,
            rows,
            Pixel::YUV420P,
            width,
            rows,
            Flags::BILINEAR,
        )?;
        Ok(Self {
            ctx,
            src: Video::new(pixel, width, rows),
            dst: Video::new(Pixel::YUV420P, width, rows),
            format,
            width,
            rows,
        })
    }

    fn matches(&self, format: SourceFormat, width: u32, rows: u32) -> bool {
        self.format == format && self.width == width && self.rows == rows
    }
}

/// Kernel running the conversion through libswscale.
///
/// The scaling context is created on first use and rebuilt whenever the
/// source format or geometry changes.
pub struct SwsKernel {
    state: Option<SwsState>,
}

// SAFETY: the scaling context and frames are owned exclusively by this
// kernel and only touched through `&mut self`, never shared across threads.
unsafe impl Send for SwsKernel {}

impl SwsKernel {
    pub fn new() -> FramerecResult<Self> {
        ffmpeg::init()
            .map_err(|e| FramerecError::backend_unavailable(format!("libav init failed: {e}")))?;
        Ok(Self { state: None })
    }

    fn state_for(
        &mut self,
        format: SourceFormat,
        width: u32,
        rows: u32,
    ) -> Result<&mut SwsState, ffmpeg::Error> {
        let stale = !matches!(&self.state, Some(s) if s.matches(format, width, rows));
        if stale {
            self.state = Some(SwsState::new(format, width, rows)?);
        }
        match self.state.as_mut() {
            Some(state) => Ok(state),
            None => Err(ffmpeg::Error::Bug),
        }
    }
}

impl ScaleKernel for SwsKernel {
    fn name(&self) -> &str {
        "swscale"
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
        if dst.format() != PlanarFormat::Yuv420p {
            return 0;
        }
        let state = match self.state_for(src_format, width, rows) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, width, rows, "Failed to create swscale context");
                return 0;
            }
        };

        let row_len = src_format.stride(width);
        let staged_stride = state.src.stride(0);
        let staged = state.src.data_mut(0);
        for y in 0..rows as usize {
            let from = y * src_stride;
            let to = y * staged_stride;
            staged[to..to + row_len].copy_from_slice(&src[from..from + row_len]);
        }

        if let Err(e) = state.ctx.run(&state.src, &mut state.dst) {
            tracing::warn!(error = %e, "swscale conversion failed");
            return 0;
        }

        for index in 0..PlanarFormat::Yuv420p.plane_count() {
            let stride = state.dst.stride(index);
            let data = state.dst.data(index);
            let plane = dst.plane_mut(index);
            for y in 0..plane.height() {
                let out = plane.row_mut(y);
                let from = y as usize * stride;
                out.copy_from_slice(&data[from..from + out.len()]);
            }
        }

        rows as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ColorConverter;

    #[test]
    fn test_uniform_gray_stays_uniform() {
        let (width, rows) = (16, 8);
        let src = vec![128u8; SourceFormat::Rgb24.frame_size(width, rows)];
        let mut dst = PlanarFrame::new(PlanarFormat::Yuv420p, width, rows).unwrap();

        let mut kernel = SwsKernel::new().unwrap();
        let processed = kernel.convert(
            &src,
            SourceFormat::Rgb24.stride(width),
            SourceFormat::Rgb24,
            &mut dst,
            width,
            rows,
        );
        assert_eq!(processed, rows as usize);

        let y0 = dst.plane(0).row(0)[0];
        for y in 0..rows {
            assert!(dst.plane(0).row(y).iter().all(|&s| s.abs_diff(y0) <= 1));
        }
        for index in 1..3 {
            for y in 0..dst.plane(index).height() {
                assert!(dst.plane(index).row(y).iter().all(|&s| s.abs_diff(128) <= 1));
            }
        }
    }

    #[test]
    fn test_converter_with_swscale_and_geometry_change() {
        let mut kernel: Box<dyn ScaleKernel> = Box::new(SwsKernel::new().unwrap());
        for (width, rows) in [(8, 4), (10, 6)] {
            let src = vec![200u8; SourceFormat::Bgra32.frame_size(width, rows)];
            let mut dst = PlanarFrame::new(PlanarFormat::Yuv420p, width, rows).unwrap();
            let mut converter =
                ColorConverter::new(kernel, SourceFormat::Bgra32, width, rows).unwrap();
            converter.convert(&src, &mut dst).unwrap();
            kernel = converter.into_kernel();
        }
        assert_eq!(kernel.name(), "swscale");
    }
}
