use opencv::{core::Mat, prelude::*, videoio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Camera device {0} is unavailable")]
    DeviceUnavailable(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Camera already released")]
    Released,
}

/// A single captured image, owned by the loop iteration that read it.
#[derive(Debug)]
pub struct Frame {
    pub mat: Mat,
}

impl Frame {
    pub fn new(mat: Mat) -> Self {
        Self { mat }
    }

    pub fn width(&self) -> i32 {
        self.mat.cols()
    }

    pub fn height(&self) -> i32 {
        self.mat.rows()
    }
}

/// Producer of frames backed by an exclusively owned device handle.
///
/// `next_frame` returns `Ok(None)` once the device has nothing more to give.
/// `release` must be idempotent: the loop calls it once on shutdown and
/// implementations may call it again from `Drop`.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
    fn release(&mut self);
}

pub struct Camera {
    device_index: i32,
    capture: Option<videoio::VideoCapture>,
}

impl Camera {
    pub fn open(device_index: i32) -> Result<Self, CameraError> {
        let capture = videoio::VideoCapture::new(device_index, videoio::CAP_ANY)
            .map_err(CameraError::OpenCameraFailed)?;
        if !capture.is_opened().map_err(CameraError::OpenCameraFailed)? {
            return Err(CameraError::DeviceUnavailable(device_index));
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or_default();
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or_default();
        tracing::info!(device_index, width, height, "Camera opened");

        Ok(Self {
            device_index,
            capture: Some(capture),
        })
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let capture = self.capture.as_mut().ok_or(CameraError::Released)?;
        let mut mat = Mat::default();
        let grabbed = capture
            .read(&mut mat)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || mat.empty() {
            return Ok(None);
        }
        Ok(Some(Frame::new(mat)))
    }

    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.release() {
                tracing::error!("Failed to release camera {}: {:?}", self.device_index, e);
            }
            tracing::info!(device_index = self.device_index, "Camera released");
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}
