use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::event::MalformedMessage;

/// One performance reading pushed by the daemon. `None` means the value has
/// not been measured yet, which is different from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    #[serde(default)]
    pub cpu_usage_percent: Option<f64>,
    #[serde(default)]
    pub memory_usage_bytes: Option<u64>,
    #[serde(default)]
    pub disk_usage_bytes: Option<u64>,
    /// Instance start, in seconds since the Unix epoch.
    #[serde(default)]
    pub start_time: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Cpu, Metric::Memory, Metric::Disk];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            Metric::Cpu => "%",
            Metric::Memory | Metric::Disk => "bytes",
        }
    }
}

impl PerformanceSample {
    pub fn parse(text: &str) -> Result<PerformanceSample, MalformedMessage> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Cpu => self.cpu_usage_percent,
            Metric::Memory => self.memory_usage_bytes.map(|v| v as f64),
            Metric::Disk => self.disk_usage_bytes.map(|v| v as f64),
        }
    }

    pub fn is_measured(&self) -> bool {
        Metric::ALL.iter().any(|m| self.value(*m).is_some())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.start_time?, 0).single()
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at()?;
        (now >= started).then(|| now - started)
    }
}
