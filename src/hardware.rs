use anyhow::{Context, Result};
use facegate_vision::{Camera, Detection, Pipeline};
use image::{DynamicImage, RgbImage};
use log::info;

use crate::config::Config;
use crate::embedding::Embedding;
use crate::provider::{CaptureError, EmbeddingProvider, FrameSource, ProviderError};
use crate::quality::FaceBox;

pub struct CameraSource {
    camera: Camera,
}

impl CameraSource {
    pub fn open(device: &str) -> Result<Self, CaptureError> {
        let camera = Camera::open(device)
            .map_err(|err| CaptureError::CameraUnavailable(format!("{device}: {err:#}")))?;
        let (width, height) = camera.dimensions();
        info!("camera {} streaming at {}x{}", device, width, height);
        Ok(Self { camera })
    }
}

impl FrameSource for CameraSource {
    type Frame = RgbImage;

    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        self.camera
            .frame()
            .map_err(|err| CaptureError::FrameUnavailable(format!("{err:#}")))
    }
}

/// A frame converted once, with the faces YuNet found in it.
struct DetectedFrame {
    image: DynamicImage,
    detections: Vec<Detection>,
}

impl DetectedFrame {
    fn faces(&self) -> Vec<FaceBox> {
        self.detections.iter().map(|d| to_face_box(&d.bbox)).collect()
    }

    /// The detection that produced `face`.
    fn detection_for(&self, face: &FaceBox) -> Option<&Detection> {
        self.detections.iter().min_by(|a, b| {
            box_offset(&a.bbox, face).total_cmp(&box_offset(&b.bbox, face))
        })
    }
}

fn to_face_box(bbox: &[f32; 4]) -> FaceBox {
    FaceBox::new(bbox[0], bbox[1], bbox[2], bbox[3])
}

fn box_offset(bbox: &[f32; 4], face: &FaceBox) -> f32 {
    (bbox[0] - face.x).abs()
        + (bbox[1] - face.y).abs()
        + (bbox[2] - face.width).abs()
        + (bbox[3] - face.height).abs()
}

/// YuNet + SFace behind the [`EmbeddingProvider`] seam.
///
/// SFace has no jittered resampling, so the `jitters` hint is ignored.
pub struct OnnxProvider {
    pipeline: Pipeline,
    last: Option<DetectedFrame>,
}

impl OnnxProvider {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let pipeline = Pipeline::from_files(&cfg.models.detector, &cfg.models.recognizer)
            .context("Failed to initialize face recognition pipeline")?;
        Ok(Self {
            pipeline,
            last: None,
        })
    }
}

impl EmbeddingProvider for OnnxProvider {
    type Frame = RgbImage;

    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<FaceBox>, ProviderError> {
        self.last = None;
        let image = DynamicImage::ImageRgb8(frame.clone());
        let detections = self
            .pipeline
            .detect(&image)
            .map_err(|err| ProviderError::detection(format!("{err:#}")))?;
        let detected = DetectedFrame { image, detections };
        let faces = detected.faces();
        self.last = Some(detected);
        Ok(faces)
    }

    /// Encodes from the frame converted by the preceding `detect_faces` call.
    fn compute_embedding(
        &mut self,
        _frame: &RgbImage,
        face: &FaceBox,
        _jitters: u32,
    ) -> Result<Embedding, ProviderError> {
        let detected = self
            .last
            .as_ref()
            .ok_or_else(|| ProviderError::embedding("no detected frame to encode"))?;
        let detection = detected
            .detection_for(face)
            .ok_or_else(|| ProviderError::embedding("no landmarks for this face"))?;
        let values = self
            .pipeline
            .embed(&detected.image, detection)
            .map_err(|err| ProviderError::embedding(format!("{err:#}")))?;
        Embedding::from_f32(&values).map_err(|err| ProviderError::embedding(err.to_string()))
    }
}
