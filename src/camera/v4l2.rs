use crate::camera::FrameSource;
use crate::common::{GreeterError, Result, Config};
use crate::common::config::CameraConfig;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use std::fs;
use std::time::Duration;

/// Device index meaning "pick the first usable camera".
pub const AUTO_DETECT_INDEX: u32 = 999;

const STREAM_BUFFERS: u32 = 4;

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub features: Vec<String>,
    pub usable: bool,
}

pub struct V4lCamera {
    stream: Option<Stream<'static>>,
    device: Device,
    index: u32,
    format: v4l::Format,
    config: CameraConfig,
}

fn video_indices() -> Result<Vec<u32>> {
    let mut indices = Vec::new();
    for entry in fs::read_dir("/dev")? {
        let entry = entry?;
        let filename = entry.file_name();
        let filename = filename.to_str().unwrap_or("");
        if let Some(index) = filename.strip_prefix("video").and_then(|s| s.parse::<u32>().ok()) {
            indices.push(index);
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

fn is_supported_fourcc(fourcc: &FourCC) -> bool {
    matches!(&fourcc.repr, b"GREY" | b"MJPG" | b"YUYV")
}

impl V4lCamera {
    pub fn new(config: &Config) -> Result<Self> {
        let device_index = if config.camera.device_index == AUTO_DETECT_INDEX {
            Self::detect_camera()?
        } else {
            config.camera.device_index
        };
        Self::new_with_device(device_index, config.camera.clone())
    }

    /// List all available cameras with their capabilities
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        for index in video_indices()? {
            let Ok(device) = Device::new(index as usize) else { continue };
            let Ok(caps) = device.query_caps() else { continue };

            let mut features = Vec::new();
            let has_capture = caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE);
            if has_capture {
                features.push("VIDEO_CAPTURE".to_string());
            } else if caps.capabilities.contains(v4l::capability::Flags::META_CAPTURE) {
                features.push("METADATA_CAPTURE".to_string());
            }

            let formats = device.enum_formats().unwrap_or_default();
            let mut supported = false;
            for fmt in &formats {
                let fourcc_str = fmt.fourcc.str().unwrap_or("UNKNOWN");
                features.push(format!("{} ({})", fourcc_str, fmt.description));
                supported |= is_supported_fourcc(&fmt.fourcc);
            }

            cameras.push(CameraInfo {
                index,
                name: caps.card.clone(),
                features,
                usable: has_capture && supported,
            });
        }

        Ok(cameras)
    }

    /// First video capture device offering GREY, MJPG or YUYV.
    pub fn detect_camera() -> Result<u32> {
        tracing::info!("Auto-detecting camera...");

        let found = Self::list_all_cameras()?.into_iter().find(|c| c.usable);
        match found {
            Some(camera) => {
                tracing::info!("Selected camera: /dev/video{} ({})", camera.index, camera.name);
                Ok(camera.index)
            }
            None => Err(GreeterError::CameraUnavailable(
                "No usable video capture device found".into()
            )),
        }
    }

    pub fn new_with_device(index: u32, config: CameraConfig) -> Result<Self> {
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| GreeterError::CameraUnavailable(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| GreeterError::Camera(format!("Failed to query capabilities: {}", e)))?;

        // Some devices only advertise metadata capture but stream fine anyway.
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} may not support standard video capture", index);
        }

        let mut fmt = device.format()
            .map_err(|e| GreeterError::Camera(format!("Failed to get format: {}", e)))?;
        tracing::debug!("Current format: {}x{} {}", fmt.width, fmt.height, fmt.fourcc);

        fmt.width = config.width;
        fmt.height = config.height;
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let format = device.format()
            .map_err(|e| GreeterError::Camera(format!("Failed to get final format: {}", e)))?;

        if !is_supported_fourcc(&format.fourcc) {
            return Err(GreeterError::Camera(format!("Unsupported pixel format {}", format.fourcc)));
        }

        if format.width != config.width || format.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                format.width, format.height, config.width, config.height
            );
        }
        tracing::info!("Camera {} ready: {}x{} {}", index, format.width, format.height, format.fourcc);

        Ok(Self { stream: None, device, index, format, config })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    fn start_stream(&mut self) -> Result<()> {
        let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| GreeterError::Camera(format!("Failed to create stream: {}", e)))?;

        for i in 0..self.config.warmup_frames {
            stream.next()
                .map_err(|e| GreeterError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
            std::thread::sleep(Duration::from_millis(self.config.warmup_delay_ms));
        }

        self.stream = Some(stream);
        Ok(())
    }

    pub fn capture_frame(&mut self) -> Result<DynamicImage> {
        if self.stream.is_none() {
            self.start_stream()?;
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(GreeterError::Camera("Stream not started".into()));
        };

        let captured = match stream.next() {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                let data = if used > 0 { &buf[..used] } else { buf };
                Ok(decode_frame(&self.format.fourcc, data, self.format.width, self.format.height))
            }
            Err(e) => Err(e),
        };

        match captured {
            Ok(frame) => frame,
            Err(e) => {
                // Recreated on the next call.
                self.stream = None;
                Err(GreeterError::Camera(format!("Failed to capture: {}", e)))
            }
        }
    }
}

impl FrameSource for V4lCamera {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        self.capture_frame()
    }
}

fn decode_frame(fourcc: &FourCC, data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    match &fourcc.repr {
        b"GREY" => grey_to_image(data, width, height),
        b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
        b"YUYV" => yuyv_to_rgb(data, width, height),
        _ => Err(GreeterError::Camera(format!("Unsupported format {}", fourcc))),
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height) as usize;
    let pixels = data.get(..len)
        .ok_or_else(|| GreeterError::Camera(format!("Short GREY frame: {} bytes", data.len())))?;
    let img_buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| GreeterError::Camera("Failed to create grayscale image buffer".into()))?;

    Ok(DynamicImage::ImageLuma8(img_buffer))
}

/// Packed YUYV 4:2:2 to RGB (BT.601, video range).
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let pixel_count = (width * height) as usize;
    if width % 2 != 0 || data.len() < pixel_count * 2 {
        return Err(GreeterError::Camera(format!(
            "Bad YUYV frame: {} bytes for {}x{}", data.len(), width, height
        )));
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for chunk in data[..pixel_count * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            rgb.extend_from_slice(&yuv_pixel(y, u, v));
        }
    }

    let img_buffer = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb)
        .ok_or_else(|| GreeterError::Camera("Failed to create RGB image buffer".into()))?;
    Ok(DynamicImage::ImageRgb8(img_buffer))
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;

    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;

    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
