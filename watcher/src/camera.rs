use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY};
use plate_watch_common::config::CameraConfig;
use tracing::{info, warn};

/// Anything that hands out frames one at a time.
///
/// `Ok(None)` means the stream has ended. Both that and an error stop the
/// capture loop; neither is retried.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Mat>, CameraError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera {0} could not be opened")]
    NotOpened(i32),
    #[error("OpenCV capture error: {0}")]
    Capture(#[from] opencv::Error),
}

/// Exclusive handle on a local capture device.
pub struct Camera {
    capture: VideoCapture,
    index: i32,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let capture = VideoCapture::new(config.index, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(CameraError::NotOpened(config.index));
        }
        info!(index = config.index, "camera opened");
        Ok(Self {
            capture,
            index: config.index,
        })
    }

    pub fn release(&mut self) {
        match self.capture.release() {
            Ok(()) => info!(index = self.index, "camera released"),
            Err(e) => warn!(index = self.index, error = %e, "failed to release camera"),
        }
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Mat>, CameraError> {
        let mut frame = Mat::default();
        let grabbed = self.capture.read(&mut frame)?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}
