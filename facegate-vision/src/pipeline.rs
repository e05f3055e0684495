use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use std::path::Path;

use crate::detector::{self, Detection};
use crate::recognizer;

/// Detector and recognizer sessions: detect faces → align → encode.
pub struct Pipeline {
    pub detector: Session,
    pub recognizer: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Pipeline {
    pub fn from_files(detector_model: &Path, recognizer_model: &Path) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector_model)?,
            recognizer: crate::model::recognizer_session(recognizer_model)?,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        })
    }

    /// Every face in the image, best score first.
    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        detector::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")
    }

    pub fn embed(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Vec<f32>> {
        let face = recognizer::align_face(img, detection);
        recognizer::encode_face(&mut self.recognizer, &face).context("encoding face")
    }
}
