//! Output reduction: quantized class distribution → predicted class.

use crate::engine::TensorView;
use crate::error::InferenceError;
use crate::model::schema::TensorType;

/// Labels of the recyclable-material classifier, by output index.
pub const DEFAULT_LABELS: [&str; 4] = ["carton", "metal", "papel", "plastico"];

/// Fixed class index → label mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Label, or `"class<N>"` for indices past the configured list.
    pub fn name(&self, index: usize) -> String {
        self.get(index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("class{}", index))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassificationResult {
    pub class_index: usize,
    /// Probability in [0, 1].
    pub confidence: f32,
}

/// Pick the most probable class from quantized scores.
///
/// Probability of class `i` is `scores[i] / 255`. Only a strictly greater
/// probability replaces the current best, so ties keep the lowest index.
/// Returns `None` when no score is positive.
pub fn aggregate(scores: &[u8]) -> Option<ClassificationResult> {
    let mut best: Option<ClassificationResult> = None;
    let mut max_prob = 0.0f32;
    for (index, &score) in scores.iter().enumerate() {
        let prob = score as f32 / 255.0;
        if prob > max_prob {
            max_prob = prob;
            best = Some(ClassificationResult {
                class_index: index,
                confidence: prob,
            });
        }
    }
    best
}

/// Unsigned scores of the output tensor, one per class.
///
/// Class count comes from the last dimension of the output shape. Int8
/// outputs are shifted by the zero point into the unsigned range.
pub fn output_scores(output: &TensorView<'_>) -> Result<Vec<u8>, InferenceError> {
    let classes = output.shape().last().copied().unwrap_or(0);
    let data = output.data();
    let n = classes.min(data.len());
    match output.dtype() {
        TensorType::UInt8 => Ok(data[..n].to_vec()),
        TensorType::Int8 => Ok(data[..n]
            .iter()
            .map(|&b| ((b as i8) as i16 + 128) as u8)
            .collect()),
        other => Err(InferenceError::UnsupportedOutputType(other)),
    }
}

/// Reduce the output tensor and log per-class probabilities.
pub fn classify(
    output: &TensorView<'_>,
    labels: &LabelMap,
) -> Result<Option<ClassificationResult>, InferenceError> {
    let scores = output_scores(output)?;
    for (index, &score) in scores.iter().enumerate() {
        log::debug!(
            "class {} ({}) -> {:.4}",
            index,
            labels.name(index),
            score as f32 / 255.0
        );
    }
    Ok(aggregate(&scores))
}
