//! Check encoder backend availability.

use framerec_common::config::config_file_path;
use framerec_encode_engine::{BackendKind, RawBackend};

pub fn run() -> anyhow::Result<()> {
    println!("FrameRec Backend Check");
    println!("{}", "=".repeat(50));

    let kinds = [
        BackendKind::Ffmpeg,
        BackendKind::Libav,
        BackendKind::Raw {
            lookahead: RawBackend::DEFAULT_LOOKAHEAD,
        },
    ];

    let mut any_compressed = false;
    for kind in kinds {
        match kind.create() {
            Ok(backend) if backend.is_available() => {
                println!("[OK]   {kind}");
                any_compressed |= !matches!(kind, BackendKind::Raw { .. });
            }
            Ok(_) => println!("[MISS] {kind}: not usable on this system"),
            Err(e) => println!("[MISS] {kind}: {e}"),
        }
    }

    println!();
    println!("Config file: {}", config_file_path().display());
    println!();
    if any_compressed {
        println!("An H.264 backend is available. FrameRec is ready.");
    } else {
        println!("No H.264 backend found; only raw YUV4MPEG2 output is possible.");
        println!("Install ffmpeg with libx264 or build with `--features libav`.");
    }

    Ok(())
}
