//! SFace embeddings from eye-aligned face crops.

use anyhow::Result;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::detector::Detection;

/// SFace input edge.
pub const FACE_SIZE: u32 = 112;

/// Eye centres of the ArcFace 112x112 template.
const TEMPLATE_EYES: [(f32, f32); 2] = [(38.2946, 51.6963), (73.5318, 51.5014)];

/// Rotates and scales `img` so the detected eyes land on the template eyes.
pub fn align_face(img: &DynamicImage, detection: &Detection) -> RgbImage {
    let eye_a = (detection.landmarks[0], detection.landmarks[1]);
    let eye_b = (detection.landmarks[2], detection.landmarks[3]);
    let [ref_a, ref_b] = TEMPLATE_EYES;

    let src_dx = eye_b.0 - eye_a.0;
    let src_dy = eye_b.1 - eye_a.1;
    let ref_dx = ref_b.0 - ref_a.0;
    let ref_dy = ref_b.1 - ref_a.1;

    let src_len = src_dx.hypot(src_dy).max(f32::EPSILON);
    // Output-to-source similarity: scale and rotation taking template vectors to source vectors.
    let scale = src_len / ref_dx.hypot(ref_dy);
    let angle = src_dy.atan2(src_dx) - ref_dy.atan2(ref_dx);
    let (sin, cos) = angle.sin_cos();

    let src_mid = ((eye_a.0 + eye_b.0) / 2.0, (eye_a.1 + eye_b.1) / 2.0);
    let ref_mid = ((ref_a.0 + ref_b.0) / 2.0, (ref_a.1 + ref_b.1) / 2.0);

    let (width, height) = img.dimensions();
    let mut out = RgbImage::new(FACE_SIZE, FACE_SIZE);
    for (ox, oy, pixel) in out.enumerate_pixels_mut() {
        let dx = ox as f32 - ref_mid.0;
        let dy = oy as f32 - ref_mid.1;
        let sx = src_mid.0 + scale * (cos * dx - sin * dy);
        let sy = src_mid.1 + scale * (sin * dx + cos * dy);
        if let Some(rgb) = sample_bilinear(img, width, height, sx, sy) {
            *pixel = rgb;
        }
    }
    out
}

fn sample_bilinear(img: &DynamicImage, width: u32, height: u32, x: f32, y: f32) -> Option<Rgb<u8>> {
    if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let corners = [
        (img.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(x1, y0), fx * (1.0 - fy)),
        (img.get_pixel(x0, y1), (1.0 - fx) * fy),
        (img.get_pixel(x1, y1), fx * fy),
    ];
    let mut rgb = [0u8; 3];
    for (c, channel) in rgb.iter_mut().enumerate() {
        let value: f32 = corners.iter().map(|(p, w)| p[c] as f32 * w).sum();
        *channel = value.round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(rgb))
}

/// L2-normalised SFace embedding of an aligned face.
pub fn encode_face(session: &mut Session, face: &RgbImage) -> Result<Vec<f32>> {
    let size = FACE_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in face.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = px[2] as f32;
        input[[0, 1, y, x]] = px[1] as f32;
        input[[0, 2, y, x]] = px[0] as f32;
    }

    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    if data.is_empty() {
        anyhow::bail!("recognizer returned an empty embedding");
    }
    Ok(l2_normalize(data.to_vec()))
}

pub fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
    values
}
