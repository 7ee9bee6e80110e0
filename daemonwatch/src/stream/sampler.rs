use crate::data::{Metric, PerformanceSample, RingBuffer};

use std::time::{Duration, Instant};

/// Samples kept for the performance view.
pub const DEFAULT_SAMPLE_WINDOW: usize = 60;

/// Keeps the last N performance samples and derives what the performance
/// view shows: the current value, a chart ceiling, and how long ago the last
/// sample arrived. There is no backfill; the daemon replays its own recent
/// window when the channel opens.
#[derive(Debug, Clone)]
pub struct TelemetrySampler {
    ring: RingBuffer<PerformanceSample>,
    last_arrival: Option<Instant>,
    received: u64,
}

impl Default for TelemetrySampler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}

impl TelemetrySampler {
    pub fn new(capacity: usize) -> TelemetrySampler {
        TelemetrySampler {
            ring: RingBuffer::new(capacity),
            last_arrival: None,
            received: 0,
        }
    }

    pub fn push(&mut self, sample: PerformanceSample) {
        self.push_at(sample, Instant::now());
    }

    pub fn push_at(&mut self, sample: PerformanceSample, arrived: Instant) {
        self.ring.push(sample);
        self.last_arrival = Some(arrived);
        self.received += 1;
    }

    pub fn samples(&self) -> &RingBuffer<PerformanceSample> {
        &self.ring
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn latest(&self) -> Option<&PerformanceSample> {
        (self.received > 0).then(|| self.ring.newest())
    }

    pub fn current(&self, metric: Metric) -> Option<f64> {
        self.latest()?.value(metric)
    }

    pub fn peak(&self, metric: Metric) -> Option<f64> {
        self.ring
            .iter()
            .filter_map(|s| s.value(metric))
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
    }

    /// Upper bound for charting `metric`; never zero.
    pub fn scale_max(&self, metric: Metric) -> f64 {
        match self.peak(metric) {
            Some(peak) if peak > 0.0 => peak,
            _ => 1.0,
        }
    }

    /// Oldest-first values of `metric`, with gaps where it was not measured.
    pub fn series(&self, metric: Metric) -> Vec<Option<f64>> {
        self.ring.iter().map(|s| s.value(metric)).collect()
    }

    /// Time since the last sample arrived, as seen by this client.
    pub fn latency(&self, now: Instant) -> Option<Duration> {
        self.last_arrival.map(|t| now.saturating_duration_since(t))
    }

    /// A sampler that has never received anything counts as stale.
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.latency(now).map_or(true, |l| l > threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu(v: f64) -> PerformanceSample {
        PerformanceSample {
            cpu_usage_percent: Some(v),
            ..Default::default()
        }
    }

    #[test]
    fn window_keeps_last_sixty() {
        let mut sampler = TelemetrySampler::default();
        for i in 1..=61 {
            sampler.push(cpu(i as f64));
        }
        let ring = sampler.samples();
        assert_eq!(ring.len(), 60);
        assert_eq!(ring[0], cpu(2.0));
        assert_eq!(ring[59], cpu(61.0));
        assert_eq!(sampler.current(Metric::Cpu), Some(61.0));
        assert_eq!(sampler.received(), 61);
    }

    #[test]
    fn nothing_received_yet() {
        let sampler = TelemetrySampler::new(4);
        assert!(sampler.latest().is_none());
        assert_eq!(sampler.current(Metric::Memory), None);
        assert_eq!(sampler.peak(Metric::Memory), None);
        assert_eq!(sampler.scale_max(Metric::Memory), 1.0);
        assert!(sampler.is_stale(Instant::now(), Duration::from_secs(60)));
        assert_eq!(sampler.series(Metric::Cpu), vec![None; 4]);
    }

    #[test]
    fn peak_skips_unmeasured_samples() {
        let mut sampler = TelemetrySampler::new(4);
        sampler.push(cpu(20.0));
        sampler.push(PerformanceSample::default());
        sampler.push(cpu(35.5));
        assert_eq!(sampler.peak(Metric::Cpu), Some(35.5));
        assert_eq!(sampler.scale_max(Metric::Cpu), 35.5);
        assert_eq!(
            sampler.series(Metric::Cpu),
            vec![None, Some(20.0), None, Some(35.5)]
        );
    }

    #[test]
    fn latency_tracks_last_arrival() {
        let mut sampler = TelemetrySampler::new(4);
        let t0 = Instant::now();
        sampler.push_at(cpu(1.0), t0);
        let later = t0 + Duration::from_millis(1500);
        assert_eq!(sampler.latency(later), Some(Duration::from_millis(1500)));
        assert!(!sampler.is_stale(later, Duration::from_secs(2)));
        assert!(sampler.is_stale(later, Duration::from_secs(1)));
    }
}
