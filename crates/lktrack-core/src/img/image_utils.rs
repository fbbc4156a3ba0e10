use image::{GenericImageView, Luma};

/// Bilinear lookup of a single-channel image. Coordinates are clamped to the image so that
/// windows overlapping the border replicate the edge pixels.
pub fn sample_clamped<T, I>(img: &I, x: f32, y: f32) -> f32
where
    I: GenericImageView<Pixel = Luma<T>>,
    T: Copy + Into<f32>,
{
    let max_x = (img.width() - 1) as f32;
    let max_y = (img.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);

    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let p00: f32 = img.get_pixel(x0, y0).0[0].into();
    let p10: f32 = img.get_pixel(x1, y0).0[0].into();
    let p01: f32 = img.get_pixel(x0, y1).0[0].into();
    let p11: f32 = img.get_pixel(x1, y1).0[0].into();

    let top = p00 + dx * (p10 - p00);
    let bot = p01 + dx * (p11 - p01);
    top + dy * (bot - top)
}
