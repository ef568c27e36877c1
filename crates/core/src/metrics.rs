// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Results of one train + test epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean training loss over the epoch
    pub train_loss: f64,
    /// Mean test loss per sample
    pub test_loss: f64,
    pub correct: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl EpochMetrics {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }
}

/// Everything a training run produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub framework: String,
    pub epochs: Vec<EpochMetrics>,
    pub total_time: Option<Duration>,
    pub artifact: Option<PathBuf>,
}

impl TrainingSummary {
    pub fn new(framework: impl Into<String>) -> Self {
        Self {
            framework: framework.into(),
            ..Self::default()
        }
    }

    pub fn record_epoch(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn final_accuracy(&self) -> Option<f64> {
        self.epochs.last().map(EpochMetrics::accuracy)
    }

    pub fn best_accuracy(&self) -> Option<f64> {
        self.epochs
            .iter()
            .map(EpochMetrics::accuracy)
            .fold(None, |best, acc| Some(best.map_or(acc, |b: f64| b.max(acc))))
    }

    pub fn print_summary(&self) {
        println!("\n=== MNIST Training Results ({}) ===", self.framework);

        for m in &self.epochs {
            println!(
                "Epoch {:>3}: train loss {:.4}, test loss {:.4}, accuracy {}/{} ({:.2}%) in {:.1?}",
                m.epoch,
                m.train_loss,
                m.test_loss,
                m.correct,
                m.total,
                percent(m.accuracy()),
                m.elapsed
            );
        }

        if let Some(total_time) = self.total_time {
            println!("Total Time: {:?}", total_time);
        }
        if let Some(best) = self.best_accuracy() {
            println!("Best Accuracy: {:.2}%", percent(best));
        }
        if let Some(artifact) = &self.artifact {
            println!("Model: {}", artifact.display());
        }

        println!("====================================\n");
    }
}

pub fn percent(fraction: f64) -> f64 {
    100.0 * fraction
}

pub fn format_train_step(epoch: usize, sample: usize, total: usize, percent_done: f64, loss: f64) -> String {
    format!(
        "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
        epoch, sample, total, percent_done, loss
    )
}

pub fn format_test_step(loss: f64, correct: usize, total: usize, percent_correct: f64) -> String {
    format!(
        "Test set: Average loss: {:.4}, Accuracy: {}/{} ({:.0}%)",
        loss, correct, total, percent_correct
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize, correct: usize) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 0.5,
            test_loss: 0.25,
            correct,
            total: 1000,
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_progress_lines() {
        assert_eq!(
            format_train_step(1, 640, 60000, percent(10.0 / 938.0), 0.2934567891),
            "Train Epoch: 1 [640/60000 (1%)]\tLoss: 0.293457"
        );
        assert_eq!(
            format_test_step(0.07123, 9781, 10000, percent(0.9781)),
            "Test set: Average loss: 0.0712, Accuracy: 9781/10000 (98%)"
        );
    }

    #[test]
    fn test_summary_accuracy() {
        let mut summary = TrainingSummary::new("torch");
        assert_eq!(summary.final_accuracy(), None);

        summary.record_epoch(epoch(1, 900));
        summary.record_epoch(epoch(2, 950));
        summary.record_epoch(epoch(3, 940));

        assert_eq!(summary.final_accuracy(), Some(0.94));
        assert_eq!(summary.best_accuracy(), Some(0.95));
    }

    #[test]
    fn test_empty_epoch_accuracy() {
        let mut m = epoch(1, 0);
        m.total = 0;
        assert_eq!(m.accuracy(), 0.0);
    }
}
