//! External `ffmpeg` process backend.
//!
//! Raw YUV 4:2:0 frames are piped into `ffmpeg` on stdin and libx264 writes
//! an Annex B H.264 elementary stream to stdout. A reader thread forwards
//! stdout chunks over a channel so the child never blocks on a full pipe;
//! stderr is collected on a second thread for error reports. Before the real
//! process starts, the same encoder options are tried on one synthetic frame
//! so a rejected configuration fails `configure` instead of the first write.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;

use framerec_common::error::{FramerecError, FramerecResult};
use framerec_pixel_core::PlanarFrame;

use super::{EncodedPacket, EncoderBackend, EncoderHandle, EncoderParams};

const READ_CHUNK: usize = 64 * 1024;

/// Backend driving an `ffmpeg` binary found on `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    binary: String,
    codec: String,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            codec: "libx264".to_string(),
        }
    }

    /// Use a specific ffmpeg executable.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Use a different ffmpeg encoder (e.g. `libx265`).
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    /// Encoder options shared by the real run and the validation run.
    fn encode_args(&self, params: &EncoderParams) -> Vec<String> {
        vec![
            "-c:v".into(),
            self.codec.clone(),
            "-preset".into(),
            params.preset.clone(),
            "-b:v".into(),
            params.bit_rate.to_string(),
            "-bufsize".into(),
            params.bit_rate_tolerance.to_string(),
            "-g".into(),
            params.gop_size.to_string(),
            "-bf".into(),
            params.max_b_frames.to_string(),
            "-pix_fmt".into(),
            params.pixel_format.ffmpeg_name().into(),
        ]
    }

    /// Build the ffmpeg command line for the given parameters.
    pub fn ffmpeg_args(&self, params: &EncoderParams) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            params.pixel_format.ffmpeg_name().into(),
            "-video_size".into(),
            format!("{}x{}", params.width, params.height),
            "-framerate".into(),
            format!("{}/{}", params.frame_rate.num, params.frame_rate.den),
            "-i".into(),
            "pipe:0".into(),
        ];
        args.extend(self.encode_args(params));
        args.extend(["-f".into(), "h264".into(), "pipe:1".into()]);
        args
    }

    /// Command line encoding one synthetic frame with the same options,
    /// discarding the output.
    pub fn validation_args(&self, params: &EncoderParams) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!(
                "nullsrc=s={}x{}:r={}/{}",
                params.width, params.height, params.frame_rate.num, params.frame_rate.den
            ),
            "-frames:v".into(),
            "1".into(),
        ];
        args.extend(self.encode_args(params));
        args.extend(["-f".into(), "null".into(), "-".into()]);
        args
    }

    /// Run the validation command and turn a rejection into an open error.
    fn validate(&self, params: &EncoderParams) -> FramerecResult<()> {
        let args = self.validation_args(params);
        tracing::debug!(?args, "Validating ffmpeg encoder configuration");
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| FramerecError::open(format!("Failed to start ffmpeg: {e}")))?;
        if !output.status.success() {
            return Err(FramerecError::open(format!(
                "ffmpeg rejected the encoder configuration (status {}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn encoder_supported(&self) -> bool {
        Command::new(&self.binary)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map(|output| {
                output.status.success()
                    && String::from_utf8_lossy(&output.stdout)
                        .split_whitespace()
                        .any(|word| word == self.codec)
            })
            .unwrap_or(false)
    }
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    fn configure(&self, params: &EncoderParams) -> FramerecResult<Box<dyn EncoderHandle>> {
        if !self.is_available() {
            return Err(FramerecError::backend_unavailable(format!(
                "'{}' not found in PATH",
                self.binary
            )));
        }
        if !self.encoder_supported() {
            return Err(FramerecError::backend_unavailable(format!(
                "{} does not provide the {} encoder",
                self.binary, self.codec
            )));
        }

        self.validate(params)?;

        let args = self.ffmpeg_args(params);
        tracing::debug!(?args, "Starting ffmpeg encoder");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FramerecError::open(format!("Failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FramerecError::allocation("Failed to capture ffmpeg stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| FramerecError::allocation("Failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| FramerecError::allocation("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently to avoid ffmpeg blocking on a full stderr pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut output = String::new();
            match stderr.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let stdout_task = std::thread::spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed reading ffmpeg output");
                        break;
                    }
                }
            }
        });

        tracing::info!(
            pid = child.id(),
            width = params.width,
            height = params.height,
            frame_rate = %params.frame_rate,
            codec = %self.codec,
            "ffmpeg encoder started"
        );

        Ok(Box::new(FfmpegEncoder {
            child,
            stdin: Some(stdin),
            output: rx,
            stdout_task: Some(stdout_task),
            stderr_task: Some(stderr_task),
            scratch: Vec::new(),
            finished: false,
        }))
    }
}

struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    output: Receiver<Vec<u8>>,
    stdout_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<String>>,
    scratch: Vec<u8>,
    finished: bool,
}

impl FfmpegEncoder {
    /// Whatever stdout produced so far, without blocking.
    fn collect_ready(&mut self) -> Option<EncodedPacket> {
        let mut data = Vec::new();
        loop {
            match self.output.try_recv() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        (!data.is_empty()).then(|| EncodedPacket::new(data, None))
    }

    /// Reap the child once stdout has closed.
    fn finish(&mut self) -> FramerecResult<()> {
        self.finished = true;
        if let Some(task) = self.stdout_task.take() {
            let _ = task.join();
        }
        let status = self
            .child
            .wait()
            .map_err(|e| FramerecError::encode(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = self
            .stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default();

        if !status.success() {
            return Err(FramerecError::encode(format!(
                "ffmpeg exited with status {status}: {}",
                stderr_output.trim()
            )));
        }
        tracing::debug!("ffmpeg encoder finished");
        Ok(())
    }
}

impl EncoderHandle for FfmpegEncoder {
    fn submit(&mut self, frame: Option<&PlanarFrame>) -> FramerecResult<Option<EncodedPacket>> {
        match frame {
            Some(frame) => {
                let stdin = self
                    .stdin
                    .as_mut()
                    .ok_or_else(|| FramerecError::encode("ffmpeg input already closed"))?;
                self.scratch.clear();
                frame.write_packed(&mut self.scratch);
                stdin
                    .write_all(&self.scratch)
                    .map_err(|e| FramerecError::encode(format!("Failed to write frame: {e}")))?;
                Ok(self.collect_ready())
            }
            None => {
                if self.finished {
                    return Ok(None);
                }
                // Closing stdin signals end of input; ffmpeg then flushes x264.
                drop(self.stdin.take());
                match self.output.recv() {
                    Ok(chunk) => Ok(Some(EncodedPacket::new(chunk, None))),
                    Err(_) => self.finish().map(|()| None),
                }
            }
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        drop(self.stdin.take());
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "ffmpeg already exited");
        }
        let _ = self.child.wait();
        if let Some(task) = self.stdout_task.take() {
            let _ = task.join();
        }
        if let Some(task) = self.stderr_task.take() {
            let _ = task.join();
        }
    }
}

fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
