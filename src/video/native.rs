//! Native camera backend via nokhwa.
//!
//! Desktop cameras carry no facing metadata, so the first enumerated camera
//! serves as the user-facing one and the second as the rear one.

use crate::error::{LiveError, Result};
use crate::video::camera::{CameraFacing, CameraProvider, VideoSource};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use tracing::{info, warn};

/// Acquires cameras by index.
#[derive(Debug, Default)]
pub struct NativeCameraProvider;

impl CameraProvider for NativeCameraProvider {
    fn acquire(&mut self, facing: CameraFacing) -> Result<Box<dyn VideoSource>> {
        let index = match facing {
            CameraFacing::User => 0,
            CameraFacing::Environment => 1,
        };
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = nokhwa::Camera::new(CameraIndex::Index(index), format)
            .map_err(|e| LiveError::Video(format!("cannot open camera {index}: {e}")))?;
        camera
            .open_stream()
            .map_err(|e| LiveError::Video(format!("cannot start camera {index}: {e}")))?;
        info!("camera {index} streaming ({facing})");
        Ok(Box::new(NativeCamera { camera }))
    }
}

struct NativeCamera {
    camera: nokhwa::Camera,
}

impl VideoSource for NativeCamera {
    fn grab_frame(&mut self) -> Result<RgbImage> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| LiveError::Video(format!("frame grab failed: {e}")))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| LiveError::Video(format!("frame decode failed: {e}")))?;
        let (width, height) = (decoded.width(), decoded.height());
        // nokhwa links its own `image` version; hand over the raw pixels.
        RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| LiveError::Video("frame buffer size mismatch".into()))
    }

    fn stop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("failed to stop camera stream: {e}");
        }
    }
}
