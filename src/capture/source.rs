//! Frame sources
//!
//! A [`FrameSource`] fills a caller-owned buffer with one RGB24 frame per
//! read. The capture loop owns the buffer and reuses it across reads.
//! [`FfmpegSource`] decodes any stream ffmpeg can open by piping raw frames
//! from a child process.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::error::CaptureError;

/// A camera or camera-like producer of raw frames
#[async_trait]
pub trait FrameSource: Send {
    /// Open (or reopen) the underlying connection
    async fn open(&mut self) -> Result<(), CaptureError>;

    /// Fill `buf` with exactly one frame
    ///
    /// `buf.len()` is `width * height * 3` for the configured geometry.
    /// Must be cancel-safe: the capture loop bounds every read with a
    /// timeout, and a read dropped part-way must not lose frame alignment.
    async fn read_frame(&mut self, buf: &mut [u8]) -> Result<(), CaptureError>;

    /// Release the underlying connection. Must be safe to call when closed.
    async fn close(&mut self);

    /// Human-readable description for logs (credentials removed)
    fn describe(&self) -> String;
}

/// ffmpeg subprocess source producing raw RGB24 frames on stdout
///
/// Partial frames are staged in `pending`, so a read cancelled by a timeout
/// resumes at the same offset on the next call.
pub struct FfmpegSource {
    url: String,
    width: u32,
    height: u32,
    fps: u32,
    ffmpeg_path: String,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    pending: Vec<u8>,
    filled: usize,
}

impl FfmpegSource {
    pub fn new(url: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            fps,
            ffmpeg_path: "ffmpeg".into(),
            child: None,
            stdout: None,
            pending: Vec::new(),
            filled: 0,
        }
    }

    /// Use a specific ffmpeg executable
    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

        if self.url.starts_with("rtsp://") || self.url.starts_with("rtsps://") {
            args.extend(["-rtsp_transport".into(), "tcp".into()]);
        }

        args.extend([
            "-i".into(),
            self.url.clone(),
            "-an".into(),
            "-vf".into(),
            format!("scale={}:{}", self.width, self.height),
            "-r".into(),
            self.fps.to_string(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-f".into(),
            "rawvideo".into(),
            "-".into(),
        ]);

        args
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn open(&mut self) -> Result<(), CaptureError> {
        self.close().await;

        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Open(format!("failed to spawn {}: {}", self.ffmpeg_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Open("ffmpeg stdout not captured".into()))?;

        tracing::debug!(source = %self.describe(), "ffmpeg started");

        self.stdout = Some(BufReader::with_capacity(256 * 1024, stdout));
        self.child = Some(child);
        Ok(())
    }

    async fn read_frame(&mut self, buf: &mut [u8]) -> Result<(), CaptureError> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| CaptureError::Unavailable("source not open".into()))?;

        if self.pending.len() != buf.len() {
            self.pending = vec![0; buf.len()];
            self.filled = 0;
        }

        // `read` is cancel-safe; progress lives in `filled`, not in this future
        while self.filled < self.pending.len() {
            let n = stdout.read(&mut self.pending[self.filled..]).await?;
            if n == 0 {
                return Err(CaptureError::Unavailable("stream ended".into()));
            }
            self.filled += n;
        }

        buf.copy_from_slice(&self.pending);
        self.filled = 0;
        Ok(())
    }

    async fn close(&mut self) {
        self.stdout = None;
        self.filled = 0;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "ffmpeg already exited");
            }
        }
    }

    fn describe(&self) -> String {
        redact_url(&self.url)
    }
}

/// Strip `user:password@` from a URL for logging
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());

    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}
