use crate::error::{ClassifierError, Result};
use ndarray::{Array1, ArrayD, ArrayView1};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub confidence: f32,
}

/// Collapses every size-1 axis, leaving one score per class.
pub fn squeeze(logits: &ArrayD<f32>) -> Result<Array1<f32>> {
    if logits.is_empty() {
        return Err(ClassifierError::EmptyOutput);
    }

    let non_unit_axes = logits.shape().iter().filter(|&&dim| dim != 1).count();
    if non_unit_axes > 1 {
        return Err(ClassifierError::InferenceFailed(format!(
            "expected a single row of class scores, got shape {:?}",
            logits.shape()
        )));
    }

    Ok(logits.iter().copied().collect())
}

/// Numerically stable softmax.
pub fn softmax(scores: ArrayView1<f32>) -> Array1<f32> {
    let max = scores.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exps = scores.mapv(|x| (x - max).exp());
    let sum = exps.sum();
    exps / sum
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: ArrayView1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |(_, best_value)| v > best_value) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

pub fn decode_prediction(logits: &ArrayD<f32>) -> Result<Prediction> {
    let scores = squeeze(logits)?;
    let probabilities = softmax(scores.view());
    let index = argmax(probabilities.view()).ok_or(ClassifierError::EmptyOutput)?;

    Ok(Prediction {
        index,
        confidence: probabilities[index],
    })
}

pub fn decode(logits: &ArrayD<f32>) -> Result<usize> {
    decode_prediction(logits).map(|prediction| prediction.index)
}
