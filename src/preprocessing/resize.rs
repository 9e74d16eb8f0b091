use super::{Interpolation, RawImage};
use crate::error::{ClassifierError, Result};
use image::imageops::{self, FilterType};
use ndarray::{Array3, ArrayView3};

/// Computes the output size for an aspect-preserving resize.
///
/// Returns `None` when neither target is set. When both are set the width
/// wins. The derived side is truncated toward zero and never drops below 1.
pub fn target_dimensions(
    width: u32,
    height: u32,
    target_width: Option<u32>,
    target_height: Option<u32>,
) -> Option<(u32, u32)> {
    match (target_width, target_height) {
        (None, None) => None,
        (Some(tw), _) => Some((tw, derived_side(height, tw, width))),
        (None, Some(th)) => Some((derived_side(width, th, height), th)),
    }
}

/// `side * target / reference`, truncated, at least 1.
fn derived_side(side: u32, target: u32, reference: u32) -> u32 {
    let scaled = side as u64 * target as u64 / reference.max(1) as u64;
    scaled.clamp(1, u32::MAX as u64) as u32
}

pub fn resize(
    image: RawImage,
    target_width: Option<u32>,
    target_height: Option<u32>,
    interpolation: Interpolation,
) -> Result<RawImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ClassifierError::InvalidImage(format!(
            "image has zero area ({}x{})",
            width, height
        )));
    }
    if target_width == Some(0) || target_height == Some(0) {
        return Err(ClassifierError::InvalidImage(
            "resize target must be positive".to_string(),
        ));
    }

    let Some((new_width, new_height)) =
        target_dimensions(width, height, target_width, target_height)
    else {
        return Ok(image);
    };
    if (new_width, new_height) == (width, height) {
        return Ok(image);
    }

    tracing::debug!(
        "Resizing {}x{} -> {}x{} ({:?})",
        width,
        height,
        new_width,
        new_height,
        interpolation
    );

    // Area averaging degenerates to pixel replication when enlarging, so
    // upscales interpolate bilinearly instead.
    let enlarging = new_width > width || new_height > height;
    let resized = match filter_type(interpolation) {
        Some(filter) => imageops::resize(&image, new_width, new_height, filter),
        None if enlarging => imageops::resize(&image, new_width, new_height, FilterType::Triangle),
        None => area_resize(&image, new_width, new_height)?,
    };

    Ok(resized)
}

fn filter_type(interpolation: Interpolation) -> Option<FilterType> {
    match interpolation {
        Interpolation::Area => None,
        Interpolation::Nearest => Some(FilterType::Nearest),
        Interpolation::Triangle => Some(FilterType::Triangle),
        Interpolation::CatmullRom => Some(FilterType::CatmullRom),
        Interpolation::Lanczos3 => Some(FilterType::Lanczos3),
    }
}

/// Per destination index, the contributing source indices and their weights.
/// Weights of each entry sum to 1.
fn area_weights(src: usize, dst: usize) -> Vec<Vec<(usize, f32)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|i| {
            let start = i as f64 * scale;
            let end = start + scale;
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src);
            (first..last)
                .filter_map(|s| {
                    let overlap = end.min(s as f64 + 1.0) - start.max(s as f64);
                    (overlap > 0.0).then(|| (s, (overlap / scale) as f32))
                })
                .collect()
        })
        .collect()
}

fn area_resize(image: &RawImage, new_width: u32, new_height: u32) -> Result<RawImage> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let (new_w, new_h) = (new_width as usize, new_height as usize);

    let src = ArrayView3::from_shape((height, width, 3), image.as_raw().as_slice())
        .map_err(|e| ClassifierError::InvalidImage(format!("pixel buffer: {}", e)))?;

    let x_weights = area_weights(width, new_w);
    let y_weights = area_weights(height, new_h);

    // Horizontal pass, then vertical pass.
    let mut rows = Array3::<f32>::zeros((height, new_w, 3));
    for y in 0..height {
        for (x, taps) in x_weights.iter().enumerate() {
            for &(sx, weight) in taps {
                for c in 0..3 {
                    rows[[y, x, c]] += src[[y, sx, c]] as f32 * weight;
                }
            }
        }
    }

    let mut out = Array3::<f32>::zeros((new_h, new_w, 3));
    for (y, taps) in y_weights.iter().enumerate() {
        for &(sy, weight) in taps {
            for x in 0..new_w {
                for c in 0..3 {
                    out[[y, x, c]] += rows[[sy, x, c]] * weight;
                }
            }
        }
    }

    let pixels: Vec<u8> = out
        .iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();

    RawImage::from_raw(new_width, new_height, pixels).ok_or_else(|| {
        ClassifierError::InvalidImage("resized buffer does not match its dimensions".to_string())
    })
}
