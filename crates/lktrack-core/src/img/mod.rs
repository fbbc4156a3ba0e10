pub mod image_utils;
pub mod mask;
pub mod pyramid;

pub use image_utils::sample_clamped;
pub use mask::{and_masks, border_detection_mask, is_allowed, is_inside_border};
pub use pyramid::{GradientImage, Pyramid, PyramidLevel, build_pyramid};
