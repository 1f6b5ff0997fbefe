//! In-process libavcodec backend.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;

use framerec_common::error::{FramerecError, FramerecResult};
use framerec_pixel_core::{PlanarFormat, PlanarFrame};

use super::{EncodedPacket, EncoderBackend, EncoderHandle, EncoderParams};

/// Backend resolving an H.264 encoder through libavcodec.
#[derive(Debug, Clone, Default)]
pub struct LibavBackend {
    /// Encoder name to prefer over the default H.264 encoder (e.g. `h264_nvenc`).
    encoder_name: Option<String>,
}

impl LibavBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoder_name(mut self, name: impl Into<String>) -> Self {
        self.encoder_name = Some(name.into());
        self
    }

    fn find_codec(&self) -> Option<ffmpeg::Codec> {
        match &self.encoder_name {
            Some(name) => ffmpeg::encoder::find_by_name(name),
            None => ffmpeg::encoder::find(ffmpeg::codec::Id::H264),
        }
    }
}

impl EncoderBackend for LibavBackend {
    fn name(&self) -> &str {
        "libav"
    }

    fn is_available(&self) -> bool {
        ffmpeg::init().is_ok() && self.find_codec().is_some()
    }

    fn configure(&self, params: &EncoderParams) -> FramerecResult<Box<dyn EncoderHandle>> {
        ffmpeg::init()
            .map_err(|e| FramerecError::backend_unavailable(format!("libav init failed: {e}")))?;
        let codec = self
            .find_codec()
            .ok_or_else(|| FramerecError::backend_unavailable("No H.264 encoder in libavcodec"))?;
        if params.pixel_format != PlanarFormat::Yuv420p {
            return Err(FramerecError::open(format!(
                "libav backend cannot encode {:?}",
                params.pixel_format
            )));
        }

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| FramerecError::allocation(format!("Failed to create encoder: {e}")))?;

        let (tb_num, tb_den) = params.frame_rate.time_base();
        encoder.set_width(params.width);
        encoder.set_height(params.height);
        encoder.set_format(ffmpeg::format::Pixel::YUV420P);
        encoder.set_time_base(ffmpeg::Rational::new(tb_num as i32, tb_den as i32));
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(
            params.frame_rate.num as i32,
            params.frame_rate.den as i32,
        )));
        encoder.set_bit_rate(params.bit_rate as usize);
        encoder.set_gop(params.gop_size);
        encoder.set_max_b_frames(params.max_b_frames as usize);

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("preset", &params.preset);
        opts.set("bt", &params.bit_rate_tolerance.to_string());

        let encoder = encoder.open_with(opts).map_err(|e| {
            FramerecError::open(format!("Failed to open encoder '{}': {e}", codec.name()))
        })?;

        tracing::info!(
            encoder = codec.name(),
            width = params.width,
            height = params.height,
            bit_rate = params.bit_rate,
            "libav encoder opened"
        );

        Ok(Box::new(LibavEncoder {
            encoder,
            width: params.width,
            height: params.height,
            eof_sent: false,
        }))
    }
}

struct LibavEncoder {
    encoder: ffmpeg::encoder::video::Encoder,
    width: u32,
    height: u32,
    eof_sent: bool,
}

impl LibavEncoder {
    /// Copy a planar frame into a fresh libav frame; the encoder may keep a
    /// reference to the previous one.
    fn stage(&self, frame: &PlanarFrame) -> ffmpeg::frame::Video {
        let mut staged =
            ffmpeg::frame::Video::new(ffmpeg::format::Pixel::YUV420P, self.width, self.height);
        for (index, plane) in frame.planes().iter().enumerate() {
            let dst_stride = staged.stride(index);
            let row_len = plane.width() as usize;
            let dst = staged.data_mut(index);
            for y in 0..plane.height() {
                let offset = y as usize * dst_stride;
                dst[offset..offset + row_len].copy_from_slice(plane.row(y));
            }
        }
        staged.set_pts(frame.pts());
        staged
    }

    /// Pull one packet if the encoder has one ready.
    fn receive(&mut self) -> FramerecResult<Option<EncodedPacket>> {
        let mut packet = ffmpeg::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(EncodedPacket {
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                pts: packet.pts(),
                keyframe: packet.is_key(),
            })),
            Err(ffmpeg::Error::Other { errno }) if errno == ffi::AVERROR(ffi::EAGAIN) => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(FramerecError::encode(format!("receive_packet failed: {e}"))),
        }
    }
}

impl EncoderHandle for LibavEncoder {
    fn submit(&mut self, frame: Option<&PlanarFrame>) -> FramerecResult<Option<EncodedPacket>> {
        match frame {
            Some(frame) => {
                if frame.width() != self.width || frame.height() != self.height {
                    return Err(FramerecError::encode(format!(
                        "frame is {}x{}, encoder configured for {}x{}",
                        frame.width(),
                        frame.height(),
                        self.width,
                        self.height
                    )));
                }
                let staged = self.stage(frame);
                self.encoder
                    .send_frame(&staged)
                    .map_err(|e| FramerecError::encode(format!("send_frame failed: {e}")))?;

                // libx264 can emit several packets per input; hand them out together.
                let mut merged: Option<EncodedPacket> = None;
                while let Some(packet) = self.receive()? {
                    match merged.as_mut() {
                        Some(out) => {
                            out.data.extend_from_slice(&packet.data);
                            out.keyframe |= packet.keyframe;
                        }
                        None => merged = Some(packet),
                    }
                }
                Ok(merged)
            }
            None => {
                if !self.eof_sent {
                    self.eof_sent = true;
                    self.encoder
                        .send_eof()
                        .map_err(|e| FramerecError::encode(format!("send_eof failed: {e}")))?;
                }
                self.receive()
            }
        }
    }
}
