mod normalize;
mod resize;

use serde::Deserialize;

pub use normalize::{normalize, normalize_hwc, IMAGENET_MEAN, IMAGENET_STD};
pub use resize::{resize, target_dimensions};

/// Decoded (height, width, 3) u8 image.
pub type RawImage = image::RgbImage;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Area-weighted mean of the covered source pixels.
    #[default]
    Area,
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

/// Order of the color planes in the model input.
///
/// Images are always decoded as RGB. `Bgr` swaps the first and last planes
/// for models exported against OpenCV-decoded data.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}
