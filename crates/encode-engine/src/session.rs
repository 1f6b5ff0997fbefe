//! Recording session management.
//!
//! A [`Recorder`] owns one encoder instance, one color converter and one
//! output sink for the lifetime of a stream. Frames go through
//! flip → convert → submit → write in call order; [`Recorder::close`] drains
//! whatever the encoder still holds before the sink is finalized.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use framerec_common::config::EncoderDefaults;
use framerec_common::error::{FramerecError, FramerecResult};
use framerec_common::timebase::{FrameRate, SessionClock};
use framerec_pixel_core::{
    default_kernel, ColorConverter, PlanarFormat, PlanarFrame, RowFlipper, ScaleKernel,
    SourceFormat,
};

use crate::backend::{BackendKind, EncodedPacket, EncoderBackend, EncoderHandle, EncoderParams};
use crate::sink::{Destination, OutputSink};

/// MPEG sequence end code, optionally appended when a stream is closed.
pub const SEQUENCE_END_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0xB7];

/// Options applied to every stream a recorder opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderOptions {
    /// Encoder backend.
    pub backend: BackendKind,

    /// Speed/quality preset passed to the encoder.
    pub preset: String,

    /// Keyframe interval in frames.
    pub gop_size: u32,

    /// Maximum consecutive B-frames.
    pub max_b_frames: u32,

    /// Override for the size-derived bit rate.
    pub bit_rate: Option<u64>,

    /// Append [`SEQUENCE_END_CODE`] on close.
    pub write_terminator: bool,

    /// Flip applied by [`Recorder::record_frame_default`].
    pub flip_y: bool,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Ffmpeg,
            preset: "slow".to_string(),
            gop_size: 10,
            max_b_frames: 1,
            bit_rate: None,
            write_terminator: false,
            flip_y: true,
        }
    }
}

impl RecorderOptions {
    /// Encoder parameters for a stream of the given geometry.
    pub fn encoder_params(&self, width: u32, height: u32, frame_rate: FrameRate) -> EncoderParams {
        let mut params = EncoderParams::new(width, height, frame_rate);
        params.preset = self.preset.clone();
        params.gop_size = self.gop_size;
        params.max_b_frames = self.max_b_frames;
        if let Some(bit_rate) = self.bit_rate {
            params.bit_rate = bit_rate;
            params.bit_rate_tolerance = bit_rate;
        }
        params
    }
}

impl TryFrom<&EncoderDefaults> for RecorderOptions {
    type Error = FramerecError;

    fn try_from(defaults: &EncoderDefaults) -> Result<Self, Self::Error> {
        Ok(Self {
            backend: BackendKind::from_name(&defaults.backend, defaults.raw_lookahead)?,
            preset: defaults.preset.clone(),
            gop_size: defaults.gop_size,
            max_b_frames: defaults.max_b_frames,
            bit_rate: None,
            write_terminator: defaults.write_terminator,
            flip_y: defaults.flip_y,
        })
    }
}

/// State of a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    /// No stream is open.
    Closed,
    /// A stream is open and accepting frames (until drained).
    Open,
}

/// Running counters for the current (or last) stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Frames handed to the encoder.
    pub frames_submitted: u64,
    /// Packets written to the sink, terminator excluded.
    pub packets_written: u64,
    /// Bytes written to the sink, terminator included.
    pub bytes_written: u64,
    /// Per-frame encode failures that were logged and skipped.
    pub encode_warnings: u64,
    /// Frames rejected by the color converter.
    pub conversion_errors: u64,
}

/// Result of closing a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub frames_submitted: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub encode_warnings: u64,
    /// Wall-clock time the stream was opened.
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub elapsed_secs: f64,
}

/// Everything that only exists while a stream is open.
struct ActiveStream {
    encoder: Box<dyn EncoderHandle>,
    converter: ColorConverter,
    frame: PlanarFrame,
    sink: Box<dyn OutputSink>,
    width: u32,
    height: u32,
    frame_rate: FrameRate,
    source_format: SourceFormat,
    clock: SessionClock,
    drained: bool,
}

impl ActiveStream {
    fn write_packet(
        &mut self,
        packet: &EncodedPacket,
        stats: &mut RecordingStats,
    ) -> FramerecResult<()> {
        if packet.is_empty() {
            return Ok(());
        }
        self.sink.write(&packet.data)?;
        stats.packets_written += 1;
        stats.bytes_written += packet.len() as u64;
        Ok(())
    }

    /// Flush the encoder until it reports nothing pending.
    fn drain(&mut self, stats: &mut RecordingStats) -> FramerecResult<u64> {
        if self.drained {
            return Ok(0);
        }
        // Frames can no longer be accepted once a flush has started, even if it fails.
        self.drained = true;
        let mut written = 0u64;
        while let Some(packet) = self.encoder.submit(None)? {
            self.write_packet(&packet, stats)?;
            written += 1;
        }
        tracing::debug!(packets = written, "Encoder drained");
        Ok(written)
    }
}

/// Records raw frames into an encoded stream.
pub struct Recorder {
    backend: Box<dyn EncoderBackend>,
    kernel: Option<Box<dyn ScaleKernel>>,
    flipper: RowFlipper,
    options: RecorderOptions,
    active: Option<ActiveStream>,
    frame_counter: u64,
    stats: RecordingStats,
}

impl Recorder {
    /// Create a recorder using the backend named in `options`.
    pub fn new(options: RecorderOptions) -> FramerecResult<Self> {
        let backend = options.backend.create()?;
        Ok(Self::with_backend(backend, options))
    }

    /// Create a recorder around an explicit backend.
    pub fn with_backend(backend: Box<dyn EncoderBackend>, options: RecorderOptions) -> Self {
        Self {
            backend,
            kernel: None,
            flipper: RowFlipper::new(),
            options,
            active: None,
            frame_counter: 0,
            stats: RecordingStats::default(),
        }
    }

    /// Use `kernel` for color conversion instead of the default kernel.
    pub fn with_kernel(mut self, kernel: Box<dyn ScaleKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Open a stream of `width x height` frames in `source_format`.
    ///
    /// The encoder, frame buffer and converter are set up before the
    /// destination is opened, so a failed open never creates or truncates a
    /// file.
    pub fn open(
        &mut self,
        destination: impl Into<Destination>,
        width: u32,
        height: u32,
        frame_rate: FrameRate,
        source_format: SourceFormat,
    ) -> FramerecResult<()> {
        if self.active.is_some() {
            return Err(FramerecError::invalid_state("Recorder already open"));
        }
        if width == 0 || height == 0 {
            return Err(FramerecError::allocation(format!(
                "Cannot record {width}x{height} frames"
            )));
        }
        if !self.backend.is_available() {
            return Err(FramerecError::backend_unavailable(format!(
                "Encoder backend '{}' is not available on this system",
                self.backend.name()
            )));
        }

        let frame_rate = frame_rate
            .validate()
            .map_err(|e| FramerecError::open(e.to_string()))?;

        let params = self.options.encoder_params(width, height, frame_rate);
        tracing::info!(
            backend = self.backend.name(),
            width,
            height,
            %frame_rate,
            %source_format,
            bit_rate = params.bit_rate,
            "Opening recorder"
        );
        let encoder = self.backend.configure(&params)?;
        let frame = PlanarFrame::new(PlanarFormat::Yuv420p, width, height)?;
        let kernel = self.kernel.take().unwrap_or_else(default_kernel);
        let converter = ColorConverter::new(kernel, source_format, width, height)?;

        // The destination is touched last: nothing after this point can fail.
        let sink = match destination.into().open() {
            Ok(sink) => sink,
            Err(e) => {
                self.kernel = Some(converter.into_kernel());
                return Err(e);
            }
        };

        self.frame_counter = 0;
        self.stats = RecordingStats::default();
        self.active = Some(ActiveStream {
            encoder,
            converter,
            frame,
            sink,
            width,
            height,
            frame_rate,
            source_format,
            clock: SessionClock::start(),
            drained: false,
        });
        Ok(())
    }

    /// Record one frame, flipping the caller's buffer in place first when
    /// `flip_y` is set.
    pub fn record_frame(&mut self, pixels: &mut [u8], flip_y: bool) -> FramerecResult<()> {
        let (width, height, source_format) = self.check_frame(pixels.len())?;
        if flip_y {
            self.flipper
                .flip(pixels, width, height, source_format.bytes_per_pixel())?;
        }
        self.submit(pixels)
    }

    /// Record one frame, flipping according to [`RecorderOptions::flip_y`].
    pub fn record_frame_default(&mut self, pixels: &mut [u8]) -> FramerecResult<()> {
        let flip_y = self.options.flip_y;
        self.record_frame(pixels, flip_y)
    }

    /// Record one frame that is already top-down.
    pub fn record_frame_unflipped(&mut self, pixels: &[u8]) -> FramerecResult<()> {
        self.check_frame(pixels.len())?;
        self.submit(pixels)
    }

    fn check_frame(&self, len: usize) -> FramerecResult<(u32, u32, SourceFormat)> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| FramerecError::invalid_state("Recorder not open"))?;
        if active.drained {
            return Err(FramerecError::invalid_state(
                "Recorder already drained; only close() is allowed",
            ));
        }
        let expected = active.source_format.frame_size(active.width, active.height);
        if len != expected {
            return Err(FramerecError::FrameSize {
                expected,
                actual: len,
            });
        }
        Ok((active.width, active.height, active.source_format))
    }

    fn submit(&mut self, pixels: &[u8]) -> FramerecResult<()> {
        let Some(active) = self.active.as_mut() else {
            return Err(FramerecError::invalid_state("Recorder not open"));
        };
        let pts = self.frame_counter as i64;
        self.frame_counter += 1;

        if let Err(e) = active.converter.convert(pixels, &mut active.frame) {
            self.stats.conversion_errors += 1;
            return Err(e);
        }
        active.frame.set_pts(Some(pts));

        match active.encoder.submit(Some(&active.frame)) {
            Ok(Some(packet)) => {
                self.stats.frames_submitted += 1;
                active.write_packet(&packet, &mut self.stats)?;
            }
            Ok(None) => {
                self.stats.frames_submitted += 1;
            }
            Err(e) => {
                self.stats.encode_warnings += 1;
                tracing::warn!(frame = pts, error = %e, "Frame could not be encoded, skipping");
            }
        }
        tracing::trace!(frame = pts, "Frame recorded");
        Ok(())
    }

    /// Flush frames the encoder is still holding, returning the number of
    /// packets written. Afterwards only [`Recorder::close`] is accepted.
    pub fn drain(&mut self) -> FramerecResult<u64> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| FramerecError::invalid_state("Recorder not open"))?;
        active.drain(&mut self.stats)
    }

    /// Drain, finalize the stream and release every resource.
    ///
    /// The recorder is closed afterwards even when an error is returned; the
    /// error is the first failure hit while shutting down.
    pub fn close(&mut self) -> FramerecResult<RecordingSummary> {
        let mut active = self
            .active
            .take()
            .ok_or_else(|| FramerecError::invalid_state("Recorder not open"))?;

        let mut first_error = None;
        if let Err(e) = active.drain(&mut self.stats) {
            tracing::warn!(error = %e, "Drain failed, closing anyway");
            first_error = Some(e);
        }

        if self.options.write_terminator && first_error.is_none() {
            match active.sink.write(&SEQUENCE_END_CODE) {
                Ok(()) => self.stats.bytes_written += SEQUENCE_END_CODE.len() as u64,
                Err(e) => first_error = Some(e),
            }
        }

        let ActiveStream {
            encoder,
            converter,
            frame,
            mut sink,
            clock,
            ..
        } = active;
        drop(encoder);
        drop(frame);
        self.kernel = Some(converter.into_kernel());
        if let Err(e) = sink.close() {
            tracing::warn!(error = %e, "Failed to close output");
            first_error.get_or_insert(e);
        }

        let summary = RecordingSummary {
            frames_submitted: self.stats.frames_submitted,
            packets_written: self.stats.packets_written,
            bytes_written: self.stats.bytes_written,
            encode_warnings: self.stats.encode_warnings,
            started_at: clock.started_at(),
            elapsed_secs: clock.elapsed_secs(),
        };
        tracing::info!(
            frames = summary.frames_submitted,
            packets = summary.packets_written,
            bytes = summary.bytes_written,
            warnings = summary.encode_warnings,
            duration_secs = summary.elapsed_secs,
            "Recorder closed"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Number of frames recorded since the last open; also the next pts.
    pub fn current_frame_number(&self) -> u64 {
        self.frame_counter
    }

    pub fn state(&self) -> RecorderState {
        if self.active.is_some() {
            RecorderState::Open
        } else {
            RecorderState::Closed
        }
    }

    /// Whether the open stream has been drained.
    pub fn is_drained(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.drained)
    }

    pub fn width(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.width)
    }

    pub fn height(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.height)
    }

    pub fn frame_rate(&self) -> Option<FrameRate> {
        self.active.as_ref().map(|a| a.frame_rate)
    }

    pub fn source_format(&self) -> Option<SourceFormat> {
        self.active.as_ref().map(|a| a.source_format)
    }

    /// Counters of the open stream, or of the last one once closed.
    pub fn stats(&self) -> RecordingStats {
        self.stats
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "Implicit close failed");
            }
        }
    }
}

/// Open a recorder on a file with options from configuration.
pub fn open_file(
    defaults: &EncoderDefaults,
    path: impl Into<PathBuf>,
    width: u32,
    height: u32,
    source_format: SourceFormat,
) -> FramerecResult<Recorder> {
    let mut recorder = Recorder::new(RecorderOptions::try_from(defaults)?)?;
    recorder.open(
        Destination::Path(path.into()),
        width,
        height,
        defaults.frame_rate,
        source_format,
    )?;
    Ok(recorder)
}
