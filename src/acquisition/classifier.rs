use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::Array2;
use rustfft::{num_complex::Complex32, FftPlanner};
use serde::Deserialize;

use crate::acquisition::AcquireError;

/// Consumes a channels x window snapshot and returns a predicted class
/// label. Black-box from the pipeline's perspective: a failure drops that
/// window's prediction and nothing else.
pub trait Classifier: Send {
    fn predict(&self, window: &Array2<f32>) -> Result<String, AcquireError>;
}

/// EEG band edges in Hz used by the frequency branch.
const BANDS: [(f32, f32); 4] = [(0.5, 4.0), (4.0, 8.0), (8.0, 13.0), (13.0, 30.0)];
const FEATURES_PER_CHANNEL: usize = 2 + BANDS.len();

#[derive(Debug, Deserialize)]
struct CentroidModel {
    classes: Vec<String>,
    centroids: Vec<Vec<f32>>,
}

/// Nearest-centroid classifier over a two-branch feature vector: per-channel
/// mean and RMS from the raw signal, plus per-channel band powers from the
/// magnitude spectrum. Centroids come from the offline training component.
pub struct CentroidClassifier {
    model: CentroidModel,
    channel_count: usize,
    sample_rate_hz: u32,
}

impl CentroidClassifier {
    pub fn load(
        path: &Path,
        channel_count: usize,
        sample_rate_hz: u32,
    ) -> Result<Self, AcquireError> {
        let file = File::open(path)
            .map_err(|e| AcquireError::BadModel(format!("{}: {e}", path.display())))?;
        let model: CentroidModel = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| AcquireError::BadModel(e.to_string()))?;
        Self::from_model(model, channel_count, sample_rate_hz)
    }

    fn from_model(
        model: CentroidModel,
        channel_count: usize,
        sample_rate_hz: u32,
    ) -> Result<Self, AcquireError> {
        if model.classes.is_empty() || model.classes.len() != model.centroids.len() {
            return Err(AcquireError::BadModel(format!(
                "{} classes vs {} centroids",
                model.classes.len(),
                model.centroids.len()
            )));
        }
        let expected = channel_count * FEATURES_PER_CHANNEL;
        for (class, centroid) in model.classes.iter().zip(&model.centroids) {
            if centroid.len() != expected {
                return Err(AcquireError::BadModel(format!(
                    "centroid for {class:?} has {} features, expected {expected}",
                    centroid.len()
                )));
            }
        }
        Ok(Self {
            model,
            channel_count,
            sample_rate_hz,
        })
    }

    fn features(&self, window: &Array2<f32>) -> Vec<f32> {
        let window_len = window.ncols();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window_len);
        let bin_width = self.sample_rate_hz as f32 / window_len as f32;

        let mut features = Vec::with_capacity(window.nrows() * FEATURES_PER_CHANNEL);
        for channel in window.outer_iter() {
            let n = channel.len() as f32;
            let mean = channel.sum() / n;
            let rms = (channel.iter().map(|v| v * v).sum::<f32>() / n).sqrt();
            features.push(mean);
            features.push(rms);

            let mut buffer: Vec<Complex32> = channel
                .iter()
                .map(|&v| Complex32::new(v - mean, 0.0))
                .collect();
            fft.process(&mut buffer);
            let magnitudes: Vec<f32> = buffer
                .iter()
                .take(window_len / 2)
                .map(|c| c.norm() / window_len as f32)
                .collect();
            for (lo, hi) in BANDS {
                let power: f32 = magnitudes
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| {
                        let freq = *k as f32 * bin_width;
                        freq >= lo && freq < hi
                    })
                    .map(|(_, m)| m * m)
                    .sum();
                features.push(power);
            }
        }
        features
    }
}

impl Classifier for CentroidClassifier {
    fn predict(&self, window: &Array2<f32>) -> Result<String, AcquireError> {
        if window.nrows() != self.channel_count {
            return Err(AcquireError::ChannelMismatch {
                expected: self.channel_count,
                actual: window.nrows(),
            });
        }
        if window.ncols() == 0 {
            return Err(AcquireError::Classifier("empty window".into()));
        }
        let features = self.features(window);
        let best = self
            .model
            .classes
            .iter()
            .zip(&self.model.centroids)
            .map(|(class, centroid)| {
                let dist: f32 = centroid
                    .iter()
                    .zip(&features)
                    .map(|(c, f)| (c - f) * (c - f))
                    .sum();
                (class, dist)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(class, _)| class.clone());
        best.ok_or_else(|| AcquireError::Classifier("model has no classes".into()))
    }
}
