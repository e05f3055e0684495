//! Seams to the camera and to face inference.

use image::RgbImage;
use thiserror::Error;

use crate::embedding::{euclidean_distance, Embedding};
use crate::quality::FaceBox;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("failed to read frame: {0}")]
    FrameUnavailable(String),
}

/// Inference failure confined to a single frame.
#[derive(Debug, Error)]
#[error("{stage} failed: {message}")]
pub struct ProviderError {
    pub stage: &'static str,
    pub message: String,
}

impl ProviderError {
    pub fn detection(message: impl Into<String>) -> Self {
        Self {
            stage: "face detection",
            message: message.into(),
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self {
            stage: "face encoding",
            message: message.into(),
        }
    }
}

pub trait Frame {
    fn dimensions(&self) -> (u32, u32);
}

impl Frame for RgbImage {
    fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

/// Exclusively owned frame producer, e.g. an open camera.
pub trait FrameSource {
    type Frame: Frame;

    fn next_frame(&mut self) -> Result<Self::Frame, CaptureError>;
}

pub trait EmbeddingProvider {
    type Frame: Frame;

    fn detect_faces(&mut self, frame: &Self::Frame) -> Result<Vec<FaceBox>, ProviderError>;

    /// `jitters` asks for resampled encodings; providers may ignore it.
    fn compute_embedding(
        &mut self,
        frame: &Self::Frame,
        face: &FaceBox,
        jitters: u32,
    ) -> Result<Embedding, ProviderError>;

    /// Symmetric, 0 for identical samples.
    fn distance(&self, a: &Embedding, b: &Embedding) -> f64 {
        euclidean_distance(a, b)
    }
}
