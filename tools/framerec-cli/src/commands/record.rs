//! Record a generated test pattern.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use framerec_common::config::EncoderDefaults;
use framerec_common::timebase::FrameRate;
use framerec_encode_engine::{
    BackendKind, Destination, Recorder, RecorderOptions, RecordingSummary,
};
use framerec_pixel_core::SourceFormat;

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Output file
    #[arg(short, long, default_value = "out.h264")]
    pub output: PathBuf,

    /// Frame width
    #[arg(long, default_value = "1280")]
    pub width: u32,

    /// Frame height
    #[arg(long, default_value = "720")]
    pub height: u32,

    /// Frame rate, e.g. "30" or "30000/1001" (defaults to the configured rate)
    #[arg(long)]
    pub fps: Option<FrameRate>,

    /// Source pixel format: rgb24 or bgra32
    #[arg(long, default_value = "rgb24")]
    pub format: SourceFormat,

    /// Number of frames to record (0 = until Ctrl+C)
    #[arg(long, default_value = "300")]
    pub frames: u64,

    /// Encoder backend: ffmpeg, libav or raw (defaults to the configured backend)
    #[arg(long)]
    pub backend: Option<String>,

    /// Encoder preset (defaults to the configured preset)
    #[arg(long)]
    pub preset: Option<String>,

    /// Append the sequence end code when the stream is closed
    #[arg(long)]
    pub terminator: bool,

    /// Submit frames as generated instead of flipping bottom-up rows
    #[arg(long)]
    pub no_flip: bool,

    /// Pace frames at the target frame rate
    #[arg(long)]
    pub realtime: bool,
}

pub async fn run(args: RecordArgs, defaults: &EncoderDefaults) -> anyhow::Result<()> {
    let mut options = RecorderOptions::try_from(defaults)?;
    if let Some(name) = &args.backend {
        options.backend = BackendKind::from_name(name, defaults.raw_lookahead)?;
    }
    if let Some(preset) = &args.preset {
        options.preset = preset.clone();
    }
    options.write_terminator |= args.terminator;
    if args.no_flip {
        options.flip_y = false;
    }
    let frame_rate = args.fps.unwrap_or(defaults.frame_rate);

    println!("Recording test pattern");
    println!("  Output: {}", args.output.display());
    println!("  Size: {}x{} {}", args.width, args.height, args.format);
    println!("  Frame rate: {frame_rate}");
    println!("  Backend: {}", options.backend);
    if args.frames == 0 {
        println!("  Frames: until Ctrl+C");
    } else {
        println!("  Frames: {}", args.frames);
    }
    println!();
    println!("Press Ctrl+C to stop early...");
    println!();

    let stop_flag = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop_flag);
    let mut worker = tokio::task::spawn_blocking(move || {
        record_pattern(args, options, frame_rate, &worker_stop)
    });

    let summary = tokio::select! {
        result = &mut worker => result??,
        _ = tokio::signal::ctrl_c() => {
            println!();
            tracing::info!("Stop requested, finishing stream");
            stop_flag.store(true, Ordering::SeqCst);
            worker.await??
        }
    };

    println!("Recording finished");
    println!("  Frames: {}", summary.frames_submitted);
    println!("  Packets: {}", summary.packets_written);
    println!("  Bytes: {}", summary.bytes_written);
    println!("  Started: {}", summary.started_at.to_rfc3339());
    println!("  Duration: {:.2}s", summary.elapsed_secs);
    if summary.encode_warnings > 0 {
        println!("  Skipped frames: {}", summary.encode_warnings);
    }
    Ok(())
}

fn record_pattern(
    args: RecordArgs,
    options: RecorderOptions,
    frame_rate: FrameRate,
    stop: &AtomicBool,
) -> anyhow::Result<RecordingSummary> {
    let flip = options.flip_y;
    let mut recorder = Recorder::new(options)?;
    recorder.open(
        Destination::Path(args.output.clone()),
        args.width,
        args.height,
        frame_rate,
        args.format,
    )?;

    let frame_interval = Duration::from_secs_f64(frame_rate.frame_duration_secs());
    let started = Instant::now();
    let mut buffer = vec![0u8; args.format.frame_size(args.width, args.height)];
    let mut index = 0u64;

    while (args.frames == 0 || index < args.frames) && !stop.load(Ordering::SeqCst) {
        fill_test_pattern(
            &mut buffer,
            args.width,
            args.height,
            args.format,
            index,
            flip,
        );
        recorder.record_frame_default(&mut buffer)?;
        index += 1;

        if args.realtime {
            let due = frame_interval * index as u32;
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
        if index % 100 == 0 {
            tracing::debug!(frames = index, "Recording progress");
        }
    }

    Ok(recorder.close()?)
}

const BAR_COLORS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 16),
    (16, 235, 235),
    (16, 235, 16),
    (235, 16, 235),
    (235, 16, 16),
    (16, 16, 235),
    (16, 16, 16),
];

/// Vertical color bars with a dark band sweeping down the picture.
///
/// With `bottom_up` the rows are stored last-first, the way GL readbacks
/// deliver them.
pub fn fill_test_pattern(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    format: SourceFormat,
    frame_index: u64,
    bottom_up: bool,
) {
    let bpp = format.bytes_per_pixel();
    let (ro, go, bo) = format.rgb_offsets();
    let width = width as usize;
    let height = height as usize;
    let row_len = width * bpp;
    let band_height = (height / 8).max(1);
    let band_top = (frame_index as usize * 4) % height;

    for (stored_row, row) in buffer.chunks_exact_mut(row_len).take(height).enumerate() {
        let y = if bottom_up {
            height - 1 - stored_row
        } else {
            stored_row
        };
        let in_band = (y + height - band_top) % height < band_height;
        for (x, pixel) in row.chunks_exact_mut(bpp).enumerate() {
            let (mut r, mut g, mut b) = BAR_COLORS[x * BAR_COLORS.len() / width];
            if in_band {
                (r, g, b) = (r / 4, g / 4, b / 4);
            }
            pixel[ro] = r;
            pixel[go] = g;
            pixel[bo] = b;
            if bpp == 4 {
                pixel[3] = 255;
            }
        }
    }
}
