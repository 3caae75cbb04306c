use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbImage};

use crate::error::{MaskError, Result};

/// One 8-bit RGB pixel.
pub type Pixel = [u8; 3];

pub const BLACK: Pixel = [0, 0, 0];

/// Decoded RGB pixels in row-major order.
///
/// `width` and `height` are both at least 1 and `pixels.len() == width * height`.
/// The buffer is never mutated after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<Pixel>,
}

/// A rendered output whose pixels are black or a pure primary.
pub type MaskImage = PixelBuffer;

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixels: Vec<Pixel>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MaskError::InvalidParameter(format!(
                "image dimensions must be at least 1x1, got {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(MaskError::InvalidParameter(format!(
                "{width}x{height} image needs {expected} pixels, got {}",
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Build a buffer by evaluating `f(x, y)` for every position.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Pixel) -> Result<Self> {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self::new(width, height, pixels)
    }

    /// Flatten any decoded image to 8-bit RGB. Alpha is dropped.
    pub fn from_dynamic(img: &DynamicImage) -> Result<Self> {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let pixels = rgb.pixels().map(|p| p.0).collect();
        Self::new(width, height, pixels)
    }

    /// Decode encoded image bytes (PNG, JPEG, ...).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).map_err(|source| MaskError::ImageDecode {
            origin: "<memory>".to_string(),
            source,
        })?;
        Self::from_dynamic(&img)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|source| MaskError::ImageDecode {
            origin: path.display().to_string(),
            source,
        })?;
        Self::from_dynamic(&img)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Pixel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        // Index is in bounds by the constructor invariant.
        RgbImage::from_fn(self.width, self.height, |x, y| {
            image::Rgb(self.pixels[y as usize * self.width as usize + x as usize])
        })
    }

    /// Write the buffer to `path`; the format follows the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.to_rgb_image()
            .save(path)
            .map_err(|source| MaskError::OutputWrite {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Encode to an in-memory image file, e.g. PNG for the browser.
    pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut cursor = Cursor::new(&mut buf);
            DynamicImage::ImageRgb8(self.to_rgb_image())
                .write_to(&mut cursor, format)
                .map_err(|e| MaskError::Internal(format!("{format:?} encode error: {e}")))?;
        }
        Ok(buf)
    }
}
