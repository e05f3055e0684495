//! YuNet face detection.
//!
//! YuNet is anchor-free: for each stride (8, 16, 32) it predicts, per grid
//! cell, a class score, an objectness score, a box (centre offset plus log
//! size, in stride units) and five landmarks (offsets in stride units).
//! Outputs arrive as cls×3, obj×3, bbox×3, kps×3, ordered by stride.

use anyhow::Result;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// Square network input edge.
pub const INPUT_SIZE: u32 = 640;
const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// x, y, w, h in source image pixels.
    pub bbox: [f32; 4],
    pub score: f32,
    /// Both eyes, nose tip and both mouth corners as x,y pairs, image-left first.
    pub landmarks: [f32; 10],
}

/// One output tensor copied out of the session.
#[derive(Debug, Clone)]
pub struct Head {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// Aspect-preserving fit of the source image into the square input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    width: u32,
    height: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32) -> Self {
        let scale = INPUT_SIZE as f32 / width.max(height).max(1) as f32;
        let fitted_w = ((width as f32 * scale) as u32).min(INPUT_SIZE);
        let fitted_h = ((height as f32 * scale) as u32).min(INPUT_SIZE);
        Self {
            scale,
            offset_x: (INPUT_SIZE - fitted_w) / 2,
            offset_y: (INPUT_SIZE - fitted_h) / 2,
            width: fitted_w,
            height: fitted_h,
        }
    }

    /// `[1, 3, 640, 640]` BGR tensor with values in `[0, 255]`.
    pub fn tensor(&self, img: &DynamicImage) -> Result<Array4<f32>> {
        let resized = img.resize_exact(self.width, self.height, FilterType::Triangle);
        let mut canvas = DynamicImage::new_rgb8(INPUT_SIZE, INPUT_SIZE);
        image::imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        let rgb = canvas.to_rgb8();

        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        let (blue, rest) = data.split_at_mut(plane);
        let (green, red) = rest.split_at_mut(plane);
        for (i, px) in rgb.as_raw().chunks_exact(3).enumerate() {
            red[i] = px[0] as f32;
            green[i] = px[1] as f32;
            blue[i] = px[2] as f32;
        }
        let size = INPUT_SIZE as usize;
        Ok(Array4::from_shape_vec((1, 3, size, size), data)?)
    }

    /// Maps a point from input canvas pixels back to source pixels.
    fn restore(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }

    fn restore_detection(&self, d: Detection) -> Detection {
        let (x, y) = self.restore(d.bbox[0], d.bbox[1]);
        let mut landmarks = d.landmarks;
        for point in landmarks.chunks_exact_mut(2) {
            let (lx, ly) = self.restore(point[0], point[1]);
            point[0] = lx;
            point[1] = ly;
        }
        Detection {
            bbox: [x, y, d.bbox[2] / self.scale, d.bbox[3] / self.scale],
            score: d.score,
            landmarks,
        }
    }
}

pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (width, height) = img.dimensions();
    let letterbox = Letterbox::fit(width, height);
    let input = Value::from_array(letterbox.tensor(img)?)?;

    let outputs = session.run(ort::inputs![input])?;
    let mut heads = Vec::with_capacity(12);
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        heads.push(Head {
            shape: shape.iter().copied().collect(),
            data: data.to_vec(),
        });
    }

    let detections = decode(&heads, score_threshold, INPUT_SIZE as usize)?
        .into_iter()
        .map(|d| letterbox.restore_detection(d))
        .collect::<Vec<_>>();
    log::debug!("{} face candidates above {score_threshold}", detections.len());

    Ok(nms(detections, nms_threshold))
}

/// Decodes the twelve YuNet heads into canvas-pixel detections.
pub fn decode(heads: &[Head], score_threshold: f32, input_size: usize) -> Result<Vec<Detection>> {
    if heads.len() < 12 {
        anyhow::bail!("expected 12 YuNet outputs, got {}", heads.len());
    }

    let mut detections = Vec::new();
    for (level, &stride) in STRIDES.iter().enumerate() {
        let cols = input_size / stride;
        let cells = cols * cols;
        let cls = head(heads, level, cells, 1)?;
        let obj = head(heads, level + 3, cells, 1)?;
        let bbox = head(heads, level + 6, cells, 4)?;
        let kps = head(heads, level + 9, cells, 10)?;
        let stride = stride as f32;

        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }
            let col = (idx % cols) as f32;
            let row = (idx / cols) as f32;

            let b = &bbox[idx * 4..idx * 4 + 4];
            let cx = (col + b[0]) * stride;
            let cy = (row + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let mut landmarks = [0.0f32; 10];
            for (k, value) in landmarks.iter_mut().enumerate() {
                let offset = kps[idx * 10 + k];
                *value = if k % 2 == 0 {
                    (col + offset) * stride
                } else {
                    (row + offset) * stride
                };
            }

            detections.push(Detection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }
    Ok(detections)
}

fn head(heads: &[Head], index: usize, cells: usize, width: usize) -> Result<&[f32]> {
    let head = &heads[index];
    if head.data.len() != cells * width {
        anyhow::bail!(
            "YuNet output {} has shape {:?}, expected [1, {}, {}]",
            index,
            head.shape,
            cells,
            width
        );
    }
    Ok(&head.data)
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep
            .iter()
            .all(|kept| iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}
