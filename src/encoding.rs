use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbaImage;
use serde_json::json;

use crate::error_codes::CodedError;

/// Where rendered frames go, chosen from the output path.
pub enum FrameSink {
    PngSequence(PngSequence),
    Video(FfmpegPipe),
}

impl FrameSink {
    /// `*.mov`, `*.mp4`, `*.mkv` pipe into ffmpeg; anything else is treated as a
    /// directory for numbered PNGs.
    pub fn for_path(output_path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        match VideoContainer::from_path(output_path) {
            Some(container) => Ok(Self::Video(FfmpegPipe::spawn(
                output_path,
                container,
                width,
                height,
                fps,
            )?)),
            None => {
                if output_path.extension().is_some() && !output_path.is_dir() {
                    return Err(anyhow!(CodedError::usage(
                        "INVALID_OUTPUT",
                        format!(
                            "unsupported output '{}'; use a directory or .mov/.mp4/.mkv",
                            output_path.display()
                        ),
                    )
                    .with_details(json!({
                        "provided": output_path.display().to_string(),
                        "allowed": ["<directory>", "mov", "mp4", "mkv"],
                    }))));
                }
                Ok(Self::PngSequence(PngSequence::create(output_path, width, height)?))
            }
        }
    }

    pub fn write_frame(&mut self, rgba_frame: Vec<u8>) -> Result<()> {
        match self {
            Self::PngSequence(sequence) => sequence.write_frame(rgba_frame),
            Self::Video(pipe) => pipe.write_frame(rgba_frame),
        }
    }

    pub fn finish(self) -> Result<()> {
        match self {
            Self::PngSequence(_) => Ok(()),
            Self::Video(pipe) => pipe.finish(),
        }
    }
}

pub struct PngSequence {
    directory: PathBuf,
    width: u32,
    height: u32,
    next_index: u32,
}

impl PngSequence {
    pub fn create(directory: &Path, width: u32, height: u32) -> Result<Self> {
        fs::create_dir_all(directory)
            .with_context(|| format!("failed to create output dir {}", directory.display()))?;
        Ok(Self {
            directory: directory.to_path_buf(),
            width,
            height,
            next_index: 0,
        })
    }

    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.directory.join(format!("frame_{index:06}.png"))
    }

    pub fn write_frame(&mut self, rgba_frame: Vec<u8>) -> Result<()> {
        let path = self.frame_path(self.next_index);
        write_png(&path, self.width, self.height, rgba_frame)?;
        self.next_index += 1;
        Ok(())
    }
}

/// Save one RGBA8 frame as PNG.
pub fn write_png(path: &Path, width: u32, height: u32, rgba_frame: Vec<u8>) -> Result<()> {
    let image = RgbaImage::from_raw(width, height, rgba_frame)
        .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height}"))?;
    image
        .save(path)
        .with_context(|| format!("failed writing {}", path.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoContainer {
    Mov,
    Mp4,
    Mkv,
}

impl VideoContainer {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "mov" => Some(Self::Mov),
            "mp4" | "m4v" => Some(Self::Mp4),
            "mkv" => Some(Self::Mkv),
            _ => None,
        }
    }
}

pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl FfmpegPipe {
    pub fn spawn(
        output_path: &Path,
        container: VideoContainer,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create output dir {}", parent.display()))?;
            }
        }

        let args = ffmpeg_args(&format!("{width}x{height}"), &fps.to_string(), container, output_path);
        Self::spawn_program("ffmpeg", args)
    }

    fn spawn_program(program: &'static str, args: Vec<String>) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);
        let worker = thread::Builder::new()
            .name("parallax-ffmpeg-encoder".to_owned())
            .spawn(move || run_encoder_process(receiver, program, &args))
            .context("failed to spawn ffmpeg writer thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn write_frame(&mut self, rgba_frame: Vec<u8>) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        if sender.send(rgba_frame).is_ok() {
            return Ok(());
        }

        // The worker only hangs up once the encoder has failed; report its error.
        self.sender = None;
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Err(error))) => Err(error.context("ffmpeg stopped accepting frames")),
            Some(Err(_)) => Err(anyhow!("ffmpeg worker thread panicked")),
            _ => Err(anyhow!("failed to enqueue frame for ffmpeg")),
        }
    }

    pub fn finish(mut self) -> Result<()> {
        drop(self.sender.take());

        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("ffmpeg worker thread missing"))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ffmpeg worker thread panicked")),
        }
    }
}

fn run_encoder_process(
    receiver: mpsc::Receiver<Vec<u8>>,
    program: &str,
    args: &[String],
) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!("{program} executable not found; install ffmpeg or render to a PNG directory")
            } else {
                anyhow!("failed to spawn {program} (args='{}'): {error}", args.join(" "))
            }
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
    let mut stderr_pipe = child.stderr.take();

    let mut write_error = None;
    while let Ok(frame) = receiver.recv() {
        if let Err(error) = stdin.write_all(&frame) {
            write_error = Some(error);
            break;
        }
    }
    drop(receiver);
    if write_error.is_none() {
        if let Err(error) = stdin.flush() {
            write_error = Some(error);
        }
    }
    drop(stdin);

    let status = child.wait().context("failed waiting for ffmpeg process")?;
    if !status.success() {
        let mut stderr = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            pipe.read_to_string(&mut stderr)
                .context("failed reading ffmpeg stderr")?;
        }
        bail!(
            "ffmpeg failed with status {status} (args='{}'): {}",
            args.join(" "),
            tail(&stderr, 500)
        );
    }
    if let Some(error) = write_error {
        return Err(error).context("failed to write frame to ffmpeg stdin");
    }
    Ok(())
}

pub fn ffmpeg_args(size: &str, fps: &str, container: VideoContainer, output_path: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner", "-loglevel", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgba", "-s:v",
        size, "-r", fps, "-i", "-", "-an",
    ]
    .iter()
    .map(|arg| (*arg).to_owned())
    .collect();

    let codec_args: &[&str] = match container {
        VideoContainer::Mov => &["-c:v", "prores_ks", "-profile:v", "3", "-pix_fmt", "yuv422p10le"],
        VideoContainer::Mp4 | VideoContainer::Mkv => {
            &["-c:v", "libx264", "-crf", "18", "-pix_fmt", "yuv420p"]
        }
    };
    args.extend(codec_args.iter().map(|arg| (*arg).to_owned()));
    if matches!(container, VideoContainer::Mov | VideoContainer::Mp4) {
        args.extend(["-movflags".to_owned(), "+faststart".to_owned()]);
    }
    args.push(output_path.to_string_lossy().into_owned());
    args
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars()
        .skip(count.saturating_sub(max_chars))
        .collect::<String>()
        .trim()
        .to_owned()
}
