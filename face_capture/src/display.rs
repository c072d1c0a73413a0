use crate::camera::Frame;
use crate::cv_utils::{annotate, CvUtilsError};
use crate::decision::Decision;
use opencv::highgui;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Failed to create window `{0}`: {1}")]
    CreateWindowFailed(String, opencv::Error),
    #[error("Failed to annotate frame: {0}")]
    Annotate(#[from] CvUtilsError),
    #[error("Failed to show frame: {0}")]
    ShowFailed(opencv::Error),
    #[error("Failed to poll keyboard: {0}")]
    PollKeyFailed(opencv::Error),
}

/// Surface the loop draws annotated frames onto.
pub trait Renderer {
    /// Draws the decision overlay and shows the frame. The frame is consumed.
    fn show(&mut self, frame: Frame, decision: &Decision) -> Result<(), DisplayError>;

    /// Non-blocking check for a user stop request.
    fn stop_requested(&mut self) -> Result<bool, DisplayError>;

    /// Tears the surface down. Safe to call more than once.
    fn close(&mut self);
}

pub struct Window {
    title: String,
    quit_key: char,
    open: bool,
}

impl Window {
    pub fn open(title: &str, quit_key: char) -> Result<Self, DisplayError> {
        highgui::named_window(title, highgui::WINDOW_AUTOSIZE)
            .map_err(|e| DisplayError::CreateWindowFailed(title.to_string(), e))?;
        tracing::info!(title, %quit_key, "Display window opened");

        Ok(Self {
            title: title.to_string(),
            quit_key,
            open: true,
        })
    }
}

impl Renderer for Window {
    fn show(&mut self, mut frame: Frame, decision: &Decision) -> Result<(), DisplayError> {
        annotate(&mut frame.mat, decision)?;
        highgui::imshow(&self.title, &frame.mat).map_err(DisplayError::ShowFailed)?;
        Ok(())
    }

    fn stop_requested(&mut self) -> Result<bool, DisplayError> {
        let key = highgui::wait_key(1).map_err(DisplayError::PollKeyFailed)?;
        Ok(key >= 0 && (key & 0xFF) == self.quit_key as i32)
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = highgui::destroy_window(&self.title) {
            tracing::error!("Failed to destroy window `{}`: {:?}", self.title, e);
        }
        tracing::info!(title = %self.title, "Display window closed");
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        self.close();
    }
}
