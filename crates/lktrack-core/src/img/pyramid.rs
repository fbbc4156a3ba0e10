use image::{
    imageops::{resize, FilterType},
    ImageBuffer, Luma,
};
use imageproc::{
    filter::gaussian_blur_f32,
    gradients::{horizontal_sobel, vertical_sobel},
    image::GrayImage,
};

use log::{debug, trace};

/// Per-pixel image derivative in intensity units per pixel.
pub type GradientImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// The 3x3 Sobel kernel weights the central difference by 8.
const SOBEL_NORMALIZATION: f32 = 1.0 / 8.0;

#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub octave: usize,
    /// Factor mapping full-resolution pixel coordinates onto this level.
    pub scale: f32,
    pub image: GrayImage,
    pub grad_x: GradientImage,
    pub grad_y: GradientImage,
}

impl PyramidLevel {
    fn new(octave: usize, image: GrayImage) -> Self {
        let grad_x = normalize_gradient(horizontal_sobel(&image));
        let grad_y = normalize_gradient(vertical_sobel(&image));
        Self {
            octave,
            scale: 1.0 / 2f32.powi(octave as i32),
            image,
            grad_x,
            grad_y,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Builds a pyramid whose level 0 is `base` itself; every further level is blurred and
/// halved. Construction stops early once a level would drop below `min_side` pixels.
pub fn build_pyramid(base: &GrayImage, octaves: usize, min_side: u32) -> Pyramid {
    assert!(octaves >= 1, "Pyramid must contain at least one octave.");

    debug!(
        "Building pyramid with {} octaves from {}x{} image",
        octaves,
        base.width(),
        base.height()
    );

    let mut levels = Vec::with_capacity(octaves);
    levels.push(PyramidLevel::new(0, base.clone()));

    for octave in 1..octaves {
        let previous = &levels[octave - 1].image;
        let (width, height) = (previous.width() / 2, previous.height() / 2);
        if width < min_side.max(2) || height < min_side.max(2) {
            trace!("Stopping pyramid at octave {octave}: {width}x{height} too small");
            break;
        }

        trace!("Processing octave {octave}");
        let blurred = gaussian_blur_f32(previous, 1.0);
        let next = resize(&blurred, width, height, FilterType::Triangle);
        levels.push(PyramidLevel::new(octave, next));
    }

    Pyramid { levels }
}

fn normalize_gradient(grad: ImageBuffer<Luma<i16>, Vec<i16>>) -> GradientImage {
    let (width, height) = grad.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        Luma([grad.get_pixel(x, y).0[0] as f32 * SOBEL_NORMALIZATION])
    })
}
