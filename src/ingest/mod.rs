//! Frame capture sources.
//!
//! - V4L2 devices (feature: ingest-v4l2), or a synthetic `stub://` source
//! - Still images: one file or a directory of jpg/png files
//!
//! Sources are acquired through `CaptureSession`, which connects once and
//! releases the device on every exit path.

pub mod file;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
pub mod v4l2;

pub use file::ImageSequenceSource;
pub use v4l2::{V4l2Config, V4l2Source};

use anyhow::Result;

use crate::config::CaptureSettings;
use crate::error::DetectError;
use crate::frame::Frame;

/// Capture source boundary: `read_frame()` yields a frame or nothing.
pub trait CaptureSource {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Acquire the underlying device or file handle.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, `None` once the source is exhausted.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying handle. Must be safe to call more than once.
    fn release(&mut self);
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Pick a source for the configured device string.
///
/// `stub://…` and `/dev/…` go to V4L2; anything else is an image path.
pub fn open_source(settings: &CaptureSettings) -> Result<Box<dyn CaptureSource>> {
    if settings.device.starts_with("stub://") || settings.device.starts_with("/dev/") {
        let source = V4l2Source::new(V4l2Config {
            device: settings.device.clone(),
            target_fps: settings.fps,
            width: settings.width,
            height: settings.height,
        })?;
        Ok(Box::new(source))
    } else {
        Ok(Box::new(ImageSequenceSource::new(&settings.device)))
    }
}

/// Scoped ownership of a connected capture source.
pub struct CaptureSession<S: CaptureSource> {
    source: S,
    frames_read: u64,
}

impl<S: CaptureSource> CaptureSession<S> {
    /// Connect `source`; it is released when the session drops.
    pub fn open(mut source: S) -> Result<Self, DetectError> {
        if let Err(err) = source.connect() {
            source.release();
            return Err(DetectError::Capture(format!(
                "failed to open {}: {:#}",
                source.describe(),
                err
            )));
        }
        Ok(Self {
            source,
            frames_read: 0,
        })
    }

    /// Next frame, or `Capture` when the source is exhausted or faults.
    pub fn read_frame(&mut self) -> Result<Frame, DetectError> {
        match self.source.read_frame() {
            Ok(Some(frame)) => {
                self.frames_read += 1;
                Ok(frame)
            }
            Ok(None) => Err(DetectError::Capture(format!(
                "{} returned no frame (source exhausted)",
                self.source.describe()
            ))),
            Err(err) => Err(DetectError::Capture(format!(
                "{}: {:#}",
                self.source.describe(),
                err
            ))),
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl<S: CaptureSource> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        self.source.release();
        log::info!(
            "released capture source {} after {} frame(s)",
            self.source.describe(),
            self.frames_read
        );
    }
}
