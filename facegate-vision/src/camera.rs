use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const GREY: &[u8; 4] = b"GREY";

/// V4L capture device producing RGB frames.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("opening {device}"))?;
        let mut fmt = dev.format().context("reading capture format")?;
        // Prefer RGB, then YUYV, else keep whatever the device reports.
        let rgb = Format::new(fmt.width, fmt.height, FourCC::new(RGB3));
        fmt = dev.set_format(&rgb).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(RGB3) {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(YUYV));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        log::info!(
            "camera {device}: {}x{} {}",
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("starting stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::trace!("frame seq={} len={}", meta.sequence, data.len());
        let buf = match &self.fourcc.repr {
            f if f == RGB3 => data.to_vec(),
            f if f == YUYV => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == GREY => grey_to_rgb(self.width, self.height, data)?,
            _ => anyhow::bail!("unsupported pixel format {}", self.fourcc),
        };
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            anyhow::bail!("short frame: got {} bytes, expected {expected}", buf.len());
        }
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_is_grey() {
        let rgb = yuyv_to_rgb(2, 1, &[100, 128, 200, 128]).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(yuyv_to_rgb(2, 2, &[0; 4]).is_err());
        assert!(grey_to_rgb(2, 2, &[0; 3]).is_err());
    }

    #[test]
    fn grey_expands_to_three_channels() {
        assert_eq!(grey_to_rgb(2, 1, &[7, 9]).unwrap(), vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn clamp_saturates() {
        assert_eq!(clamp(-3.0), 0);
        assert_eq!(clamp(300.0), 255);
    }
}
