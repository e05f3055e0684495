use serde::{Deserialize, Serialize};

/// Detected face rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityVerdict {
    Accept,
    TooClose,
    TooFar,
}

/// Face size bounds, in percent of the frame edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGate {
    pub min_face_percent: f64,
    pub max_face_percent: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_face_percent: 15.0,
            max_face_percent: 60.0,
        }
    }
}

impl QualityGate {
    pub fn accepts(&self, face: &FaceBox, frame_width: u32, frame_height: u32) -> QualityVerdict {
        if frame_width == 0 || frame_height == 0 {
            return QualityVerdict::TooFar;
        }
        let width_pct = f64::from(face.width) / f64::from(frame_width) * 100.0;
        let height_pct = f64::from(face.height) / f64::from(frame_height) * 100.0;

        if width_pct > self.max_face_percent || height_pct > self.max_face_percent {
            QualityVerdict::TooClose
        } else if width_pct < self.min_face_percent || height_pct < self.min_face_percent {
            QualityVerdict::TooFar
        } else {
            QualityVerdict::Accept
        }
    }
}

/// [`QualityGate::accepts`] with the default 15%/60% bounds.
pub fn accepts(face: &FaceBox, frame_width: u32, frame_height: u32) -> QualityVerdict {
    QualityGate::default().accepts(face, frame_width, frame_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(side: f32) -> FaceBox {
        FaceBox::new(0.0, 0.0, side, side)
    }

    #[test]
    fn boundaries() {
        assert_eq!(accepts(&square(150.0), 1000, 1000), QualityVerdict::Accept);
        assert_eq!(accepts(&square(149.0), 1000, 1000), QualityVerdict::TooFar);
        assert_eq!(accepts(&square(601.0), 1000, 1000), QualityVerdict::TooClose);
        assert_eq!(accepts(&square(600.0), 1000, 1000), QualityVerdict::Accept);
    }

    #[test]
    fn either_axis_can_reject() {
        let wide = FaceBox::new(0.0, 0.0, 700.0, 300.0);
        assert_eq!(accepts(&wide, 1000, 1000), QualityVerdict::TooClose);
        let short = FaceBox::new(0.0, 0.0, 300.0, 100.0);
        assert_eq!(accepts(&short, 1000, 1000), QualityVerdict::TooFar);
    }

    #[test]
    fn too_close_wins_over_too_far() {
        let sliver = FaceBox::new(0.0, 0.0, 900.0, 50.0);
        assert_eq!(accepts(&sliver, 1000, 1000), QualityVerdict::TooClose);
    }

    #[test]
    fn degenerate_frame_is_rejected() {
        assert_eq!(accepts(&square(10.0), 0, 480), QualityVerdict::TooFar);
    }
}
