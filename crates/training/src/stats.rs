//! Running loss statistics across the whole run.

use crate::losses::LossValues;

/// One slot per sample id; the mean skips slots that are still zero.
#[derive(Debug, Clone)]
pub struct SlotMeans {
    values: Vec<f32>,
}

impl SlotMeans {
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn record(&mut self, id: usize, value: f32) {
        if let Some(slot) = self.values.get_mut(id) {
            *slot = value;
        }
    }

    pub fn mean(&self) -> f32 {
        let (sum, count) = self
            .values
            .iter()
            .filter(|v| **v != 0.0)
            .fold((0.0f64, 0usize), |(s, c), v| (s + *v as f64, c + 1));
        if count == 0 {
            0.0
        } else {
            (sum / count as f64) as f32
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeanSnapshot {
    pub total: f32,
    pub perceptual: f32,
    /// Stored ×255, matching the logged per-step value.
    pub exclusion: f32,
    pub adversarial: f32,
}

#[derive(Debug, Clone)]
pub struct TrainStats {
    total: SlotMeans,
    perceptual: SlotMeans,
    exclusion: SlotMeans,
    adversarial: SlotMeans,
}

impl TrainStats {
    pub fn new(num_train: usize) -> Self {
        Self {
            total: SlotMeans::new(num_train),
            perceptual: SlotMeans::new(num_train),
            exclusion: SlotMeans::new(num_train),
            adversarial: SlotMeans::new(num_train),
        }
    }

    pub fn record(&mut self, id: usize, values: &LossValues) {
        self.total.record(id, values.total);
        self.perceptual.record(id, values.perceptual);
        self.exclusion.record(id, values.exclusion * 255.0);
        self.adversarial.record(id, values.adversarial);
    }

    pub fn means(&self) -> MeanSnapshot {
        MeanSnapshot {
            total: self.total.mean(),
            perceptual: self.perceptual.mean(),
            exclusion: self.exclusion.mean(),
            adversarial: self.adversarial.mean(),
        }
    }
}
