use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use framerec_common::error::{FramerecError, FramerecResult};
use framerec_common::timebase::FrameRate;
use framerec_encode_engine::{
    Destination, EncodedPacket, EncoderBackend, EncoderHandle, EncoderParams, MemorySink,
    RawBackend, Recorder, RecorderOptions, RecorderState, SEQUENCE_END_CODE,
};
use framerec_pixel_core::{PlanarFrame, ScaleKernel, SourceFormat};

fn raw_recorder(lookahead: usize, options: RecorderOptions) -> Recorder {
    Recorder::with_backend(Box::new(RawBackend::new(lookahead)), options)
}

fn open_memory(recorder: &mut Recorder, width: u32, height: u32) -> MemorySink {
    let sink = MemorySink::new();
    recorder
        .open(
            Destination::Sink(Box::new(sink.clone())),
            width,
            height,
            FrameRate::FPS_30,
            SourceFormat::Rgb24,
        )
        .unwrap();
    sink
}

fn gray_frame(width: u32, height: u32, level: u8) -> Vec<u8> {
    vec![level; SourceFormat::Rgb24.frame_size(width, height)]
}

/// Backend whose encoder fails every `fail_every`-th frame and otherwise
/// emits one packet per frame.
struct FlakyBackend {
    fail_every: u64,
    configured: Arc<AtomicU64>,
}

struct FlakyEncoder {
    fail_every: u64,
    seen: u64,
}

impl EncoderBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn configure(&self, _params: &EncoderParams) -> FramerecResult<Box<dyn EncoderHandle>> {
        self.configured.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakyEncoder {
            fail_every: self.fail_every,
            seen: 0,
        }))
    }
}

impl EncoderHandle for FlakyEncoder {
    fn submit(&mut self, frame: Option<&PlanarFrame>) -> FramerecResult<Option<EncodedPacket>> {
        let Some(frame) = frame else {
            return Ok(None);
        };
        self.seen += 1;
        if self.seen % self.fail_every == 0 {
            return Err(FramerecError::encode("synthetic failure"));
        }
        Ok(Some(EncodedPacket::new(vec![0xAB; 4], frame.pts())))
    }
}

/// Backend that refuses every configuration.
struct RejectingBackend;

impl EncoderBackend for RejectingBackend {
    fn name(&self) -> &str {
        "rejecting"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn configure(&self, _params: &EncoderParams) -> FramerecResult<Box<dyn EncoderHandle>> {
        Err(FramerecError::open("configuration rejected"))
    }
}

struct UnavailableBackend;

impl EncoderBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn configure(&self, _params: &EncoderParams) -> FramerecResult<Box<dyn EncoderHandle>> {
        unreachable!("configure must not be called on an unavailable backend")
    }
}

/// Kernel that stops one row short.
struct ShortKernel;

impl ScaleKernel for ShortKernel {
    fn name(&self) -> &str {
        "short"
    }

    fn convert(
        &mut self,
        _src: &[u8],
        _src_stride: usize,
        _src_format: SourceFormat,
        _dst: &mut PlanarFrame,
        _width: u32,
        rows: u32,
    ) -> usize {
        rows as usize - 1
    }
}

#[test]
fn record_before_open_is_invalid_state() {
    let mut recorder = raw_recorder(0, RecorderOptions::default());
    let mut frame = gray_frame(4, 4, 0);
    let err = recorder.record_frame(&mut frame, true).unwrap_err();
    assert!(matches!(err, FramerecError::InvalidState { .. }));
    assert!(matches!(
        recorder.close(),
        Err(FramerecError::InvalidState { .. })
    ));
    assert!(matches!(
        recorder.drain(),
        Err(FramerecError::InvalidState { .. })
    ));
}

#[test]
fn opening_twice_is_invalid_state() {
    let mut recorder = raw_recorder(0, RecorderOptions::default());
    open_memory(&mut recorder, 4, 4);
    let err = recorder
        .open(
            Destination::Sink(Box::new(MemorySink::new())),
            4,
            4,
            FrameRate::FPS_30,
            SourceFormat::Rgb24,
        )
        .unwrap_err();
    assert!(matches!(err, FramerecError::InvalidState { .. }));
    assert_eq!(recorder.state(), RecorderState::Open);
}

#[test]
fn open_and_close_without_frames_creates_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.y4m");
    let mut recorder = raw_recorder(2, RecorderOptions::default());
    recorder
        .open(
            path.as_path(),
            64,
            64,
            FrameRate::FPS_30,
            SourceFormat::Rgb24,
        )
        .unwrap();
    let summary = recorder.close().unwrap();

    assert_eq!(summary.frames_submitted, 0);
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"YUV4MPEG2 W64 H64 F30:1"));
    assert_eq!(recorder.state(), RecorderState::Closed);
}

#[test]
fn buffered_frames_come_out_on_drain() {
    const FRAMES: u64 = 10;
    const LOOKAHEAD: usize = 3;

    let mut recorder = raw_recorder(LOOKAHEAD, RecorderOptions::default());
    let sink = open_memory(&mut recorder, 8, 4);
    for i in 0..FRAMES {
        let mut frame = gray_frame(8, 4, i as u8 * 20);
        recorder.record_frame(&mut frame, false).unwrap();
    }

    let during = sink.packet_sizes().len() as u64;
    assert!(during >= FRAMES - LOOKAHEAD as u64);
    assert!(during <= FRAMES);

    assert_eq!(recorder.drain().unwrap(), FRAMES - during);
    assert_eq!(recorder.drain().unwrap(), 0);
    assert!(recorder.is_drained());

    let summary = recorder.close().unwrap();
    assert_eq!(summary.packets_written, FRAMES);
    assert_eq!(summary.frames_submitted, FRAMES);
    assert_eq!(sink.packet_sizes().len() as u64, FRAMES);
    assert_eq!(summary.bytes_written, sink.contents().len() as u64);
}

#[test]
fn frames_after_drain_are_rejected() {
    let mut recorder = raw_recorder(1, RecorderOptions::default());
    open_memory(&mut recorder, 4, 2);
    recorder.drain().unwrap();
    let mut frame = gray_frame(4, 2, 0);
    let err = recorder.record_frame(&mut frame, false).unwrap_err();
    assert!(matches!(err, FramerecError::InvalidState { .. }));
    assert_eq!(recorder.current_frame_number(), 0);
    recorder.close().unwrap();
}

#[test]
fn frame_counter_advances_through_encode_failures() {
    let configured = Arc::new(AtomicU64::new(0));
    let backend = FlakyBackend {
        fail_every: 3,
        configured: Arc::clone(&configured),
    };
    let mut recorder = Recorder::with_backend(Box::new(backend), RecorderOptions::default());
    let sink = open_memory(&mut recorder, 4, 4);

    for expected in 1..=9 {
        let mut frame = gray_frame(4, 4, 100);
        recorder.record_frame(&mut frame, true).unwrap();
        assert_eq!(recorder.current_frame_number(), expected);
    }

    let stats = recorder.stats();
    assert_eq!(stats.encode_warnings, 3);
    assert_eq!(stats.frames_submitted, 6);
    assert_eq!(sink.packet_sizes().len(), 6);
    assert_eq!(configured.load(Ordering::SeqCst), 1);

    let summary = recorder.close().unwrap();
    assert_eq!(summary.encode_warnings, 3);
}

#[test]
fn frame_counter_advances_on_conversion_error() {
    let mut recorder = raw_recorder(0, RecorderOptions::default()).with_kernel(Box::new(ShortKernel));
    let sink = open_memory(&mut recorder, 4, 4);

    let mut frame = gray_frame(4, 4, 0);
    let err = recorder.record_frame(&mut frame, false).unwrap_err();
    assert!(matches!(err, FramerecError::Conversion { .. }));
    assert_eq!(recorder.current_frame_number(), 1);
    assert_eq!(recorder.stats().conversion_errors, 1);
    assert_eq!(recorder.state(), RecorderState::Open);

    recorder.close().unwrap();
    // Only the stream header was written.
    assert!(sink.contents().starts_with(b"YUV4MPEG2"));
    assert_eq!(sink.packet_sizes().len(), 1);
}

#[test]
fn wrong_buffer_length_does_not_advance_counter() {
    let mut recorder = raw_recorder(0, RecorderOptions::default());
    open_memory(&mut recorder, 4, 4);
    let mut short = vec![0u8; 10];
    let err = recorder.record_frame(&mut short, true).unwrap_err();
    assert!(matches!(
        err,
        FramerecError::FrameSize {
            expected: 48,
            actual: 10
        }
    ));
    assert_eq!(recorder.current_frame_number(), 0);
}

#[test]
fn terminator_is_appended_when_enabled() {
    let options = RecorderOptions {
        write_terminator: true,
        ..Default::default()
    };
    let mut recorder = raw_recorder(1, options);
    let sink = open_memory(&mut recorder, 4, 2);
    let mut frame = gray_frame(4, 2, 50);
    recorder.record_frame(&mut frame, false).unwrap();
    recorder.close().unwrap();

    let bytes = sink.contents();
    assert!(bytes.ends_with(&SEQUENCE_END_CODE));
}

#[test]
fn terminator_is_off_by_default() {
    let mut recorder = raw_recorder(0, RecorderOptions::default());
    let sink = open_memory(&mut recorder, 2, 2);
    let mut frame = gray_frame(2, 2, 0);
    recorder.record_frame(&mut frame, false).unwrap();
    recorder.close().unwrap();
    assert!(!sink.contents().ends_with(&SEQUENCE_END_CODE));
}

#[test]
fn flip_mutates_the_callers_buffer() {
    let mut recorder = raw_recorder(0, RecorderOptions::default());
    open_memory(&mut recorder, 1, 2);
    let mut frame = vec![1, 1, 1, 2, 2, 2];
    recorder.record_frame(&mut frame, true).unwrap();
    assert_eq!(frame, vec![2, 2, 2, 1, 1, 1]);

    let frame = vec![1, 1, 1, 2, 2, 2];
    recorder.record_frame_unflipped(&frame).unwrap();
    assert_eq!(recorder.current_frame_number(), 2);
    recorder.close().unwrap();
}

#[test]
fn rejected_configuration_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.h264");
    let mut recorder = Recorder::with_backend(Box::new(RejectingBackend), RecorderOptions::default());
    let err = recorder
        .open(path.as_path(), 16, 16, FrameRate::FPS_30, SourceFormat::Rgb24)
        .unwrap_err();
    assert!(matches!(err, FramerecError::Open { .. }));
    assert!(!path.exists());
    assert_eq!(recorder.state(), RecorderState::Closed);
}

#[test]
fn failed_open_keeps_an_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("existing.h264");
    std::fs::write(&path, b"keep").unwrap();

    let mut recorder = Recorder::with_backend(Box::new(RejectingBackend), RecorderOptions::default());
    recorder
        .open(path.as_path(), 16, 16, FrameRate::FPS_30, SourceFormat::Rgb24)
        .unwrap_err();
    assert_eq!(std::fs::read(&path).unwrap(), b"keep");

    let mut recorder = raw_recorder(0, RecorderOptions::default());
    recorder
        .open(path.as_path(), 16, 16, FrameRate { num: 30, den: 0 }, SourceFormat::Rgb24)
        .unwrap_err();
    assert_eq!(std::fs::read(&path).unwrap(), b"keep");
}

#[test]
fn degenerate_frame_rates_are_rejected() {
    for rate in [FrameRate { num: 30, den: 0 }, FrameRate { num: 0, den: 1 }] {
        let mut recorder = raw_recorder(0, RecorderOptions::default());
        let sink = MemorySink::new();
        let err = recorder
            .open(
                Destination::Sink(Box::new(sink.clone())),
                16,
                16,
                rate,
                SourceFormat::Rgb24,
            )
            .unwrap_err();
        assert!(matches!(err, FramerecError::Open { .. }), "{rate:?}: {err}");
        assert_eq!(recorder.state(), RecorderState::Closed);
        assert!(sink.contents().is_empty());
    }
}

#[test]
fn default_flip_follows_options() {
    let mut recorder = raw_recorder(0, RecorderOptions::default());
    open_memory(&mut recorder, 1, 2);
    let mut frame = vec![1, 1, 1, 2, 2, 2];
    recorder.record_frame_default(&mut frame).unwrap();
    assert_eq!(frame, vec![2, 2, 2, 1, 1, 1]);
    recorder.close().unwrap();

    let options = RecorderOptions {
        flip_y: false,
        ..RecorderOptions::default()
    };
    let mut recorder = raw_recorder(0, options);
    open_memory(&mut recorder, 1, 2);
    let mut frame = vec![1, 1, 1, 2, 2, 2];
    recorder.record_frame_default(&mut frame).unwrap();
    assert_eq!(frame, vec![1, 1, 1, 2, 2, 2]);
    assert_eq!(recorder.current_frame_number(), 1);
    recorder.close().unwrap();
}

#[test]
fn unavailable_backend_is_reported() {
    let mut recorder =
        Recorder::with_backend(Box::new(UnavailableBackend), RecorderOptions::default());
    let err = recorder
        .open(
            Destination::Sink(Box::new(MemorySink::new())),
            16,
            16,
            FrameRate::FPS_30,
            SourceFormat::Rgb24,
        )
        .unwrap_err();
    assert!(matches!(err, FramerecError::BackendUnavailable { .. }));
    assert!(err.is_setup_error());
}

#[test]
fn unopenable_destination_is_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("out.y4m");
    let mut recorder = raw_recorder(0, RecorderOptions::default());
    let err = recorder
        .open(path.as_path(), 16, 16, FrameRate::FPS_30, SourceFormat::Rgb24)
        .unwrap_err();
    assert!(matches!(err, FramerecError::Open { .. }));
    assert_eq!(recorder.state(), RecorderState::Closed);
}

#[test]
fn stream_destination_receives_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream.y4m");
    let file = std::fs::File::create(&path).unwrap();

    let mut recorder = raw_recorder(2, RecorderOptions::default());
    recorder
        .open(
            Destination::Stream(Box::new(file)),
            4,
            2,
            FrameRate::FPS_30,
            SourceFormat::Bgra32,
        )
        .unwrap();
    for _ in 0..3 {
        let mut frame = vec![0u8; SourceFormat::Bgra32.frame_size(4, 2)];
        recorder.record_frame(&mut frame, true).unwrap();
    }
    let summary = recorder.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() as u64, summary.bytes_written);
    let frames = bytes.windows(6).filter(|w| w == b"FRAME\n").count();
    assert_eq!(frames, 3);
}

#[test]
fn dropping_an_open_recorder_drains_it() {
    let sink = {
        let mut recorder = raw_recorder(4, RecorderOptions::default());
        let sink = open_memory(&mut recorder, 2, 2);
        for _ in 0..4 {
            let mut frame = gray_frame(2, 2, 10);
            recorder.record_frame(&mut frame, false).unwrap();
        }
        assert!(sink.packet_sizes().is_empty());
        sink
    };
    assert_eq!(sink.packet_sizes().len(), 4);
}

#[test]
fn reopening_resets_the_counter() {
    let mut recorder = raw_recorder(0, RecorderOptions::default());
    open_memory(&mut recorder, 2, 2);
    let mut frame = gray_frame(2, 2, 0);
    recorder.record_frame(&mut frame, false).unwrap();
    recorder.close().unwrap();
    assert_eq!(recorder.current_frame_number(), 1);

    open_memory(&mut recorder, 2, 2);
    assert_eq!(recorder.current_frame_number(), 0);
    assert_eq!(recorder.stats().frames_submitted, 0);
    recorder.close().unwrap();
}
