//! Camera acquisition and front/rear switching.

use crate::error::{LiveError, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Which way the camera points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    /// Front camera, facing the user.
    #[default]
    User,
    /// Rear camera.
    Environment,
}

impl CameraFacing {
    /// The other camera.
    pub fn flipped(self) -> Self {
        match self {
            Self::User => Self::Environment,
            Self::Environment => Self::User,
        }
    }
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// A live video track that still frames can be grabbed from.
pub trait VideoSource {
    /// Grab the current frame.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame is available.
    fn grab_frame(&mut self) -> Result<RgbImage>;

    /// Stop the track and release the device.
    fn stop(&mut self);
}

/// Opens video tracks for a given facing.
pub trait CameraProvider {
    /// Acquire a camera.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera is missing or access is denied.
    fn acquire(&mut self, facing: CameraFacing) -> Result<Box<dyn VideoSource>>;
}

/// The session's camera: the current track plus the means to replace it.
pub struct Camera {
    provider: Box<dyn CameraProvider>,
    source: Option<Box<dyn VideoSource>>,
    facing: CameraFacing,
}

impl Camera {
    /// Acquire the initial track.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera cannot be acquired.
    pub fn open(mut provider: Box<dyn CameraProvider>, facing: CameraFacing) -> Result<Self> {
        let source = provider.acquire(facing)?;
        info!("camera opened ({facing})");
        Ok(Self {
            provider,
            source: Some(source),
            facing,
        })
    }

    /// Current facing.
    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    /// Whether a track is live.
    pub fn is_active(&self) -> bool {
        self.source.is_some()
    }

    /// Grab one frame from the live track.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera is stopped or the grab fails.
    pub fn grab_frame(&mut self) -> Result<RgbImage> {
        match self.source.as_mut() {
            Some(source) => source.grab_frame(),
            None => Err(LiveError::Video("camera is not running".into())),
        }
    }

    /// Stop the current track and re-acquire with the opposite facing.
    ///
    /// On failure the facing reverts and the previous camera is re-acquired,
    /// so a failed switch leaves the camera as it was.
    ///
    /// # Errors
    ///
    /// Returns the acquisition error for the new facing.
    pub fn toggle_facing(&mut self) -> Result<CameraFacing> {
        self.stop();

        let previous = self.facing;
        let next = previous.flipped();
        self.facing = next;

        match self.provider.acquire(next) {
            Ok(source) => {
                self.source = Some(source);
                info!("camera switched to {next}");
                Ok(next)
            }
            Err(e) => {
                warn!("failed to switch camera to {next}: {e}");
                self.facing = previous;
                match self.provider.acquire(previous) {
                    Ok(source) => self.source = Some(source),
                    Err(restore) => warn!("failed to restore {previous} camera: {restore}"),
                }
                Err(e)
            }
        }
    }

    /// Stop the live track. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
    }
}
