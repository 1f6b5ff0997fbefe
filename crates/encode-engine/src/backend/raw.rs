//! Uncompressed YUV4MPEG2 backend.
//!
//! Emits every frame untouched as a `FRAME` record of a YUV4MPEG2 stream,
//! which ffplay/mpv/ffmpeg read directly. Output is held back by a fixed
//! look-ahead so that callers exercise the same drain path a real encoder
//! needs: the first `lookahead` submissions yield nothing, and the final
//! `lookahead` frames only come out while flushing.

use std::collections::VecDeque;

use framerec_common::error::{FramerecError, FramerecResult};
use framerec_pixel_core::{PlanarFormat, PlanarFrame};

use super::{EncodedPacket, EncoderBackend, EncoderHandle, EncoderParams};

/// Backend producing YUV4MPEG2 streams.
#[derive(Debug, Clone)]
pub struct RawBackend {
    lookahead: usize,
}

impl RawBackend {
    pub const DEFAULT_LOOKAHEAD: usize = 2;

    pub fn new(lookahead: usize) -> Self {
        Self { lookahead }
    }

    pub fn lookahead(&self) -> usize {
        self.lookahead
    }
}

impl Default for RawBackend {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOOKAHEAD)
    }
}

impl EncoderBackend for RawBackend {
    fn name(&self) -> &str {
        "raw"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn configure(&self, params: &EncoderParams) -> FramerecResult<Box<dyn EncoderHandle>> {
        if params.pixel_format != PlanarFormat::Yuv420p {
            return Err(FramerecError::open(format!(
                "raw backend cannot store {:?}",
                params.pixel_format
            )));
        }
        if params.width == 0 || params.height == 0 {
            return Err(FramerecError::open(format!(
                "raw backend rejects {}x{} frames",
                params.width, params.height
            )));
        }
        tracing::debug!(
            width = params.width,
            height = params.height,
            lookahead = self.lookahead,
            "Raw encoder configured"
        );
        Ok(Box::new(RawEncoder::new(params, self.lookahead)))
    }
}

/// Stream header written ahead of the first frame.
pub fn stream_header(params: &EncoderParams) -> String {
    format!(
        "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 C420mpeg2\n",
        params.width, params.height, params.frame_rate.num, params.frame_rate.den
    )
}

/// Marker that starts every frame record.
pub const FRAME_MARKER: &[u8] = b"FRAME\n";

struct RawEncoder {
    header: Option<Vec<u8>>,
    lookahead: usize,
    pending: VecDeque<EncodedPacket>,
    flushing: bool,
    width: u32,
    height: u32,
}

impl RawEncoder {
    fn new(params: &EncoderParams, lookahead: usize) -> Self {
        Self {
            header: Some(stream_header(params).into_bytes()),
            lookahead,
            pending: VecDeque::with_capacity(lookahead + 1),
            flushing: false,
            width: params.width,
            height: params.height,
        }
    }

    fn package(&mut self, frame: &PlanarFrame) -> EncodedPacket {
        let mut data = self.header.take().unwrap_or_default();
        data.reserve(FRAME_MARKER.len() + frame.packed_size());
        data.extend_from_slice(FRAME_MARKER);
        frame.write_packed(&mut data);
        EncodedPacket {
            data,
            pts: frame.pts(),
            keyframe: true,
        }
    }
}

impl EncoderHandle for RawEncoder {
    fn submit(&mut self, frame: Option<&PlanarFrame>) -> FramerecResult<Option<EncodedPacket>> {
        match frame {
            Some(frame) => {
                if self.flushing {
                    return Err(FramerecError::encode("raw encoder is already flushing"));
                }
                if frame.width() != self.width || frame.height() != self.height {
                    return Err(FramerecError::encode(format!(
                        "frame is {}x{}, encoder configured for {}x{}",
                        frame.width(),
                        frame.height(),
                        self.width,
                        self.height
                    )));
                }
                let packet = self.package(frame);
                self.pending.push_back(packet);
                if self.pending.len() > self.lookahead {
                    Ok(self.pending.pop_front())
                } else {
                    Ok(None)
                }
            }
            None => {
                self.flushing = true;
                if let Some(packet) = self.pending.pop_front() {
                    return Ok(Some(packet));
                }
                // An empty stream still gets its header so readers accept it.
                Ok(self
                    .header
                    .take()
                    .map(|header| EncodedPacket::new(header, None)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framerec_common::timebase::FrameRate;

    fn frame(pts: i64) -> PlanarFrame {
        let mut frame = PlanarFrame::new(PlanarFormat::Yuv420p, 4, 2).unwrap();
        frame.set_pts(Some(pts));
        frame
    }

    fn encoder(lookahead: usize) -> Box<dyn EncoderHandle> {
        RawBackend::new(lookahead)
            .configure(&EncoderParams::new(4, 2, FrameRate::FPS_30))
            .unwrap()
    }

    #[test]
    fn test_lookahead_delays_output() {
        let mut enc = encoder(2);
        assert!(enc.submit(Some(&frame(0))).unwrap().is_none());
        assert!(enc.submit(Some(&frame(1))).unwrap().is_none());
        let first = enc.submit(Some(&frame(2))).unwrap().unwrap();
        assert_eq!(first.pts, Some(0));
        assert!(first.data.starts_with(b"YUV4MPEG2 W4 H2 F30:1"));

        let drained: Vec<_> = std::iter::from_fn(|| enc.submit(None).unwrap())
            .map(|p| p.pts)
            .collect();
        assert_eq!(drained, vec![Some(1), Some(2)]);
        assert!(enc.submit(None).unwrap().is_none());
    }

    #[test]
    fn test_zero_lookahead_is_immediate() {
        let mut enc = encoder(0);
        let packet = enc.submit(Some(&frame(0))).unwrap().unwrap();
        // header + marker + 8 luma + 2 + 2 chroma samples
        let header_len = "YUV4MPEG2 W4 H2 F30:1 Ip A1:1 C420mpeg2\n".len();
        assert_eq!(packet.len(), header_len + FRAME_MARKER.len() + 12);
        assert!(enc.submit(None).unwrap().is_none());
    }

    #[test]
    fn test_empty_stream_flushes_header_only() {
        let mut enc = encoder(3);
        let header = enc.submit(None).unwrap().unwrap();
        assert!(header.data.starts_with(b"YUV4MPEG2"));
        assert!(header.pts.is_none());
        assert!(enc.submit(None).unwrap().is_none());
    }

    #[test]
    fn test_rejects_frames_after_flush() {
        let mut enc = encoder(1);
        enc.submit(None).unwrap();
        assert!(matches!(
            enc.submit(Some(&frame(0))),
            Err(FramerecError::Encode { .. })
        ));
    }
}
