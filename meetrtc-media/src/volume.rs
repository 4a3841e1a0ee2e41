//! Audio level smoothing for producers and consumers

use crate::track::SharedTrack;
use meetrtc_core::EventStream;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// Sampling parameters for an [`AudioLevelMonitor`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevelOptions {
    /// Sample interval in milliseconds
    pub interval_ms: u64,
    /// Speaking threshold in dB
    pub threshold_db: f64,
}

impl Default for AudioLevelOptions {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            threshold_db: -60.0,
        }
    }
}

/// Host capability producing periodic level samples (dB) for a track
pub trait AudioLevelMonitor: Send + Sync {
    /// Start sampling `track`; the stream ends when sampling stops
    fn monitor(&self, track: SharedTrack, options: AudioLevelOptions) -> EventStream<f64>;
}

/// Smoothed volume reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Level in dB
    pub volume: i32,
    /// Level on a 0..=10 scale
    pub scaled_volume: u32,
}

/// Turns raw dB samples into [`Volume`] readings
///
/// Changes of half a dB or less are ignored and drops are eased so the
/// meter decays instead of flickering.
#[derive(Debug, Clone)]
pub struct VolumeSmoother {
    last_volume: f64,
}

impl Default for VolumeSmoother {
    fn default() -> Self {
        Self { last_volume: -100.0 }
    }
}

impl VolumeSmoother {
    /// Create a smoother starting at silence
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample, returning a reading when the level moved
    pub fn update(&mut self, sample_db: f64) -> Option<Volume> {
        let mut volume = round_half_up(sample_db);
        if (volume - self.last_volume).abs() <= 0.5 {
            return None;
        }

        let headroom = 100.0 + self.last_volume;
        if volume < self.last_volume && headroom > 0.0 {
            let drop = (volume - self.last_volume) / headroom;
            volume = round_half_up(self.last_volume - drop.powi(2) * 10.0);
        }
        self.last_volume = volume;

        let scaled = round_half_up((volume + 60.0) * 100.0 / 60.0 / 10.0).max(0.0);
        Some(Volume {
            volume: volume as i32,
            scaled_volume: scaled as u32,
        })
    }
}

/// Round to the nearest integer, halves toward positive infinity
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Background task feeding level samples through a [`VolumeSmoother`]
#[derive(Debug)]
pub struct VolumeWatcher {
    task: JoinHandle<()>,
}

impl VolumeWatcher {
    /// Start watching `samples`, calling `on_change` for every reading
    pub fn spawn<F>(mut samples: EventStream<f64>, mut on_change: F) -> Self
    where
        F: FnMut(Volume) + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut smoother = VolumeSmoother::new();
            while let Some(sample) = samples.next().await {
                if let Some(volume) = smoother.update(sample) {
                    on_change(volume);
                }
            }
        });
        Self { task }
    }

    /// Stop watching
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for VolumeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_level() {
        let mut smoother = VolumeSmoother::new();
        let reading = smoother.update(-30.2).unwrap();
        assert_eq!(reading.volume, -30);
        assert_eq!(reading.scaled_volume, 5);
    }

    #[test]
    fn test_small_changes_ignored() {
        let mut smoother = VolumeSmoother::new();
        smoother.update(-30.0).unwrap();
        assert_eq!(smoother.update(-30.4), None);
        assert_eq!(smoother.update(-29.6), None);
    }

    #[test]
    fn test_drop_is_eased() {
        let mut smoother = VolumeSmoother::new();
        smoother.update(-20.0).unwrap();

        // (-60 - -20) / 80 = -0.5, squared * 10 = 2.5, so -20 - 2.5 rounds to -22
        let reading = smoother.update(-60.0).unwrap();
        assert_eq!(reading.volume, -22);
        assert_eq!(reading.scaled_volume, 6);
    }

    #[test]
    fn test_scaled_volume_clamped() {
        let mut smoother = VolumeSmoother::new();
        let reading = smoother.update(-90.0).unwrap();
        assert_eq!(reading.volume, -90);
        assert_eq!(reading.scaled_volume, 0);
    }

    #[tokio::test]
    async fn test_watcher_emits_readings() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel();
        let watcher = VolumeWatcher::spawn(EventStream::new(rx), move |v| {
            let _ = out_tx.send(v);
        });

        tx.send(-10.0).unwrap();
        tx.send(-10.2).unwrap();
        tx.send(0.0).unwrap();

        assert_eq!(out_rx.recv().await.unwrap().volume, -10);
        assert_eq!(out_rx.recv().await.unwrap().volume, 0);
        watcher.stop();
    }
}
