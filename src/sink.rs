use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use image::ImageFormat;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::processing::compose::ComposedFrame;

/// Whatever puts a finished frame in front of people.
pub trait DisplaySink {
    fn show(&self, frame: &ComposedFrame) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<T: DisplaySink + Send + Sync> DisplaySink for Arc<T> {
    fn show(&self, frame: &ComposedFrame) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).show(frame)
    }
}

/// Writes the frame as PNG, replacing the previous file atomically, then
/// optionally runs a shell command (e.g. a framebuffer or e-paper uploader)
/// with `FRAME_PATH` pointing at the new file.
#[derive(Debug, Clone)]
pub struct FileSink {
    output: PathBuf,
    command: Option<String>,
}

impl FileSink {
    pub fn new(output: impl Into<PathBuf>, command: Option<String>) -> Self {
        Self {
            output: output.into(),
            command,
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "frame.png".into());
        name.push(".tmp");
        self.output.with_file_name(name)
    }
}

impl DisplaySink for FileSink {
    async fn show(&self, frame: &ComposedFrame) -> Result<(), SinkError> {
        let mut encoded = Cursor::new(Vec::new());
        frame.image.write_to(&mut encoded, ImageFormat::Png)?;

        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = self.staging_path();
        tokio::fs::write(&staging, encoded.into_inner()).await?;
        tokio::fs::rename(&staging, &self.output).await?;
        debug!(path = %self.output.display(), "frame written");

        if let Some(command) = &self.command {
            run_display_command(command, &self.output).await?;
        }
        Ok(())
    }
}

async fn run_display_command(command: &str, frame_path: &Path) -> Result<(), SinkError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("FRAME_PATH", frame_path)
        .output()
        .await
        .map_err(|err| SinkError::Command(format!("failed to spawn shell for {command}: {err}")))?;

    if output.status.success() {
        info!(command, "display command succeeded");
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SinkError::Command(format!(
            "command exited with status {}: {command}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )))
    }
}

/// Keeps every shown frame in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Mutex<Vec<ComposedFrame>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<ComposedFrame> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DisplaySink for MemorySink {
    async fn show(&self, frame: &ComposedFrame) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Command("display offline".to_string()));
        }
        let mut frames = self
            .frames
            .lock()
            .map_err(|_| SinkError::Command("frame log poisoned".to_string()))?;
        frames.push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::layout::Placement;
    use image::{Rgba, RgbaImage};

    fn frame() -> ComposedFrame {
        ComposedFrame {
            image: RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255])),
            placement: Placement {
                x_offset: 0,
                y_offset: 0,
                width: 4,
                height: 3,
            },
        }
    }

    #[tokio::test]
    async fn file_sink_writes_png_and_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out/frame.png");
        let marker = dir.path().join("shown");
        let sink = FileSink::new(
            &output,
            Some(format!("cp \"$FRAME_PATH\" {}", marker.display())),
        );
        sink.show(&frame()).await.unwrap();

        let written = image::open(&output).unwrap().to_rgba8();
        assert_eq!(written.dimensions(), (4, 3));
        assert!(marker.exists());
        assert!(!sink.staging_path().exists());
    }

    #[tokio::test]
    async fn failing_command_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("frame.png"), Some("exit 3".to_string()));
        let err = sink.show(&frame()).await.unwrap_err();
        assert!(matches!(err, SinkError::Command(_)));
    }
}
