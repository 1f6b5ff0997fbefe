//! Reusable planar frame buffers.

use framerec_common::error::{FramerecError, FramerecResult};

use crate::format::PlanarFormat;

/// Row alignment of every plane, in bytes.
pub const PLANE_ALIGN: usize = 32;

/// One plane of a planar image.
#[derive(Debug, Clone)]
pub struct Plane {
    data: Vec<u8>,
    stride: usize,
    width: u32,
    height: u32,
}

impl Plane {
    fn alloc(width: u32, height: u32) -> FramerecResult<Self> {
        let stride = (width as usize).next_multiple_of(PLANE_ALIGN);
        let len = stride
            .checked_mul(height as usize)
            .ok_or_else(|| FramerecError::allocation("Plane size overflows usize"))?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            FramerecError::allocation(format!("Failed to allocate {len} byte plane: {e}"))
        })?;
        data.resize(len, 0);

        Ok(Self {
            data,
            stride,
            width,
            height,
        })
    }

    /// Bytes per row including alignment padding.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Width in samples.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in rows.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Visible samples of row `y`.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize]
    }

    /// Visible samples of row `y`, mutably.
    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.data[start..start + self.width as usize]
    }

    /// Raw storage including padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Raw storage including padding, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A planar frame allocated once per session and refilled for every input.
#[derive(Debug, Clone)]
pub struct PlanarFrame {
    format: PlanarFormat,
    width: u32,
    height: u32,
    planes: Vec<Plane>,
    pts: Option<i64>,
}

impl PlanarFrame {
    /// Allocate a zeroed frame.
    pub fn new(format: PlanarFormat, width: u32, height: u32) -> FramerecResult<Self> {
        if width == 0 || height == 0 {
            return Err(FramerecError::allocation(format!(
                "Cannot allocate a {width}x{height} frame"
            )));
        }

        let planes = (0..format.plane_count())
            .map(|i| {
                let (w, h) = format.plane_dimensions(i, width, height);
                Plane::alloc(w, h)
            })
            .collect::<FramerecResult<Vec<_>>>()?;

        Ok(Self {
            format,
            width,
            height,
            planes,
            pts: None,
        })
    }

    pub fn format(&self) -> PlanarFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Presentation timestamp stamped by the recorder.
    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut Plane {
        &mut self.planes[index]
    }

    /// The luma and both chroma planes, mutably and at once.
    pub fn yuv_planes_mut(&mut self) -> (&mut Plane, &mut Plane, &mut Plane) {
        let [y, u, v] = self.planes.as_mut_slice() else {
            unreachable!("yuv420p frames always carry three planes");
        };
        (y, u, v)
    }

    /// Size of the frame without row padding.
    pub fn packed_size(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }

    /// Append the visible samples of every plane, without padding, to `out`.
    pub fn write_packed(&self, out: &mut Vec<u8>) {
        out.reserve(self.packed_size());
        for plane in &self.planes {
            for y in 0..plane.height {
                out.extend_from_slice(plane.row(y));
            }
        }
    }

    /// The visible samples of every plane as one contiguous buffer.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_packed(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv420p_plane_layout() {
        let frame = PlanarFrame::new(PlanarFormat::Yuv420p, 64, 48).unwrap();
        assert_eq!(frame.planes().len(), 3);
        assert_eq!(frame.plane(0).width(), 64);
        assert_eq!(frame.plane(0).height(), 48);
        assert_eq!(frame.plane(1).width(), 32);
        assert_eq!(frame.plane(2).height(), 24);
        assert_eq!(frame.plane(1).stride() % PLANE_ALIGN, 0);
    }

    #[test]
    fn test_zero_dimensions_are_rejected() {
        let err = PlanarFrame::new(PlanarFormat::Yuv420p, 0, 10).unwrap_err();
        assert!(matches!(err, FramerecError::Allocation { .. }));
    }

    #[test]
    fn test_packed_output_drops_padding() {
        let mut frame = PlanarFrame::new(PlanarFormat::Yuv420p, 3, 3).unwrap();
        frame.plane_mut(0).row_mut(0).copy_from_slice(&[1, 2, 3]);
        let packed = frame.to_packed();
        assert_eq!(packed.len(), 9 + 4 + 4);
        assert_eq!(&packed[..3], &[1, 2, 3]);
    }
}
