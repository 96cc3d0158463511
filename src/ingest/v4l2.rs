//! V4L2 frame source.
//!
//! `V4l2Source` reads frames from a local camera node (e.g. `/dev/video0`),
//! or from a synthetic generator for `stub://` paths.
//!
//! Requested size and frame rate are hints: the device may negotiate
//! something else, and frames always carry the size actually delivered.

use anyhow::Result;
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(not(feature = "ingest-v4l2"))]
use anyhow::anyhow;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

use super::CaptureSource;
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate.
    pub target_fps: u32,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 24,
            width: 640,
            height: 480,
        }
    }
}

/// V4L2 frame source.
pub struct V4l2Source {
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticV4l2Source),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceV4l2Source),
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: V4l2Backend::Synthetic(SyntheticV4l2Source::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: V4l2Backend::Device(DeviceV4l2Source::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "capture from {} requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }

    /// Frames delivered so far.
    pub fn frames_captured(&self) -> u64 {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.frame_count,
        }
    }
}

impl CaptureSource for V4l2Source {
    fn describe(&self) -> String {
        match &self.backend {
            V4l2Backend::Synthetic(source) => format!("{} (synthetic)", source.config.device),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.config.device.clone(),
        }
    }

    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.connect(),
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.read_frame(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.read_frame(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.connected = false,
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.state = None,
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demo runs
// ----------------------------------------------------------------------------

struct SyntheticV4l2Source {
    config: V4l2Config,
    frame_count: u64,
    connected: bool,
}

impl SyntheticV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "V4l2Source: connected to {} (synthetic, {}x{})",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        let frame = Frame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )?;
        Ok(Some(frame))
    }

    /// Diagonal gradient that drifts by one step per frame.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as u64, self.config.height as u64);
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let base = x + y + self.frame_count;
                pixels.extend_from_slice(&[
                    (base % 256) as u8,
                    ((base * 3) % 256) as u8,
                    ((x * 255) / w.max(1)) as u8,
                ]);
            }
        }
        pixels
    }
}

// ----------------------------------------------------------------------------
// Device source using the v4l crate
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceV4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    pixel_format: super::normalize::PixelFormat,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            pixel_format: super::normalize::PixelFormat::Rgb24,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use super::normalize::PixelFormat;
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).with_context(|| {
            format!(
                "unsupported pixel format {} on {}",
                format.fourcc, self.config.device
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        if (self.active_width, self.active_height) != (self.config.width, self.config.height) {
            log::warn!(
                "V4l2Source: requested {}x{}, device delivers {}x{}",
                self.config.width,
                self.config.height,
                self.active_width,
                self.active_height
            );
        }

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let (width, height, format) = (self.active_width, self.active_height, self.pixel_format);
        let image = state.with_mut(|fields| -> Result<_> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            super::normalize::normalize_to_rgb(&buf[..used], width, height, format)
        })?;

        self.frame_count += 1;
        Ok(Some(Frame::from_image(image, self.frame_count)?))
    }
}
