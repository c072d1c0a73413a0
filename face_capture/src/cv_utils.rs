use crate::camera::Frame;
use crate::decision::Decision;
use opencv::{
    core::{Mat, Point, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(opencv::Error),
    #[error("Encoder produced no data for a {0}x{1} frame")]
    EmptyEncoding(i32, i32),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CvUtilsError {
    fn from(err: opencv::Error) -> Self {
        CvUtilsError::OpenCvError(err)
    }
}

/// Compressed frame payload sent to the face matching service.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
}

pub trait FrameCodec {
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, CvUtilsError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl FrameCodec for JpegCodec {
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, CvUtilsError> {
        let mut buf = Vector::<u8>::new();
        let encoded = imgcodecs::imencode(".jpg", &frame.mat, &mut buf, &Vector::new())
            .map_err(CvUtilsError::EncodeFrameFailed)?;
        if !encoded || buf.is_empty() {
            return Err(CvUtilsError::EmptyEncoding(frame.width(), frame.height()));
        }
        Ok(EncodedFrame { bytes: buf.into() })
    }
}

/// BGR color and text origin for each outcome.
fn overlay_style(decision: &Decision) -> (Scalar, Point) {
    match decision {
        Decision::Match { .. } => (Scalar::new(0.0, 255.0, 0.0, 0.0), Point::new(10, 30)),
        Decision::LowMatch { .. } => (Scalar::new(0.0, 165.0, 255.0, 0.0), Point::new(10, 30)),
        Decision::NoMatch => (Scalar::new(0.0, 0.0, 255.0, 0.0), Point::new(10, 30)),
        Decision::SearchError { .. } => (Scalar::new(255.0, 0.0, 0.0, 0.0), Point::new(10, 60)),
    }
}

pub fn annotate(mat: &mut Mat, decision: &Decision) -> Result<(), CvUtilsError> {
    let (color, origin) = overlay_style(decision);
    imgproc::put_text(
        mat,
        &decision.label(),
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        1.0,
        color,
        2,
        imgproc::LINE_AA,
        false,
    )
    .map_err(CvUtilsError::from)?;
    Ok(())
}
