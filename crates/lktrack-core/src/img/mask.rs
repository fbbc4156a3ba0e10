//! Binary detection masks. A non-zero pixel allows detection, zero forbids it.

use image::{GrayImage, Luma};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use nalgebra::Vector2;

pub const MASK_ALLOWED: u8 = 255;
pub const MASK_FORBIDDEN: u8 = 0;

/// Mask that forbids a band of `margin` pixels along every image edge.
///
/// The allowed region starts at `margin + 1` and spans `dim - 2 * margin - 1` pixels, so that
/// any allowed pixel also passes [`is_inside_border`].
pub fn border_detection_mask(width: u32, height: u32, margin: u32) -> GrayImage {
    let mut mask = GrayImage::from_pixel(width, height, Luma([MASK_FORBIDDEN]));
    let roi_width = width.saturating_sub(2 * margin + 1);
    let roi_height = height.saturating_sub(2 * margin + 1);
    if roi_width > 0 && roi_height > 0 {
        let roi = Rect::at((margin + 1) as i32, (margin + 1) as i32).of_size(roi_width, roi_height);
        draw_filled_rect_mut(&mut mask, roi, Luma([MASK_ALLOWED]));
    }
    mask
}

/// Pixel-wise AND of two equally sized masks.
pub fn and_masks(lhs: &GrayImage, rhs: &GrayImage) -> GrayImage {
    assert_eq!(
        lhs.dimensions(),
        rhs.dimensions(),
        "Masks must share dimensions."
    );
    GrayImage::from_fn(lhs.width(), lhs.height(), |x, y| {
        let allowed = lhs.get_pixel(x, y).0[0] != 0 && rhs.get_pixel(x, y).0[0] != 0;
        Luma([if allowed { MASK_ALLOWED } else { MASK_FORBIDDEN }])
    })
}

/// True when the pixel containing `position` is allowed. Positions outside the mask are not.
pub fn is_allowed(mask: &GrayImage, position: &Vector2<f64>) -> bool {
    if position.x < 0.0 || position.y < 0.0 {
        return false;
    }
    let (x, y) = (position.x as u32, position.y as u32);
    x < mask.width() && y < mask.height() && mask.get_pixel(x, y).0[0] != 0
}

/// True when `position` keeps at least `margin` pixels of distance to every image edge.
pub fn is_inside_border(position: &Vector2<f64>, width: u32, height: u32, margin: u32) -> bool {
    let margin = margin as f64;
    position.x >= margin
        && position.y >= margin
        && position.x < width as f64 - margin
        && position.y < height as f64 - margin
}

pub fn count_allowed(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p.0[0] != 0).count()
}
