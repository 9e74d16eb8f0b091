use super::{ChannelOrder, RawImage};
use crate::error::{ClassifierError, Result};
use ndarray::{Array3, Array4, ArrayView3, Axis, Zip};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Converts an RGB image into a `(1, 3, H, W)` ImageNet-normalized tensor.
pub fn normalize(image: &RawImage, order: ChannelOrder) -> Result<Array4<f32>> {
    let (width, height) = image.dimensions();
    let hwc = ArrayView3::from_shape(
        (height as usize, width as usize, 3),
        image.as_raw().as_slice(),
    )
    .map_err(|e| ClassifierError::InvalidImage(format!("pixel buffer: {}", e)))?;

    normalize_hwc(hwc, order)
}

/// Same as [`normalize`] over a raw `(H, W, C)` view. `C` must be 3.
pub fn normalize_hwc(hwc: ArrayView3<u8>, order: ChannelOrder) -> Result<Array4<f32>> {
    let (height, width, channels) = hwc.dim();
    if channels != 3 {
        return Err(ClassifierError::InvalidImage(format!(
            "expected 3 color channels, got {}",
            channels
        )));
    }

    let chw = hwc.permuted_axes([2, 0, 1]);
    let mut tensor = Array3::<f32>::zeros((3, height, width));

    for (c, mut plane) in tensor.axis_iter_mut(Axis(0)).enumerate() {
        let source = match order {
            ChannelOrder::Rgb => c,
            ChannelOrder::Bgr => 2 - c,
        };
        let (mean, std) = (IMAGENET_MEAN[c], IMAGENET_STD[c]);
        Zip::from(&mut plane)
            .and(chw.index_axis(Axis(0), source))
            .for_each(|out, &raw| *out = (raw as f32 / 255.0 - mean) / std);
    }

    Ok(tensor.insert_axis(Axis(0)))
}
