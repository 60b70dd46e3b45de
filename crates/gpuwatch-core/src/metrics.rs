use crate::model::{Device, Service};
use chrono::{DateTime, Duration, Utc};

pub const HIGH_MEMORY_PERCENT: f64 = 80.0;
pub const WARM_TEMPERATURE_C: f64 = 60.0;
pub const HOT_TEMPERATURE_C: f64 = 80.0;
const VENDOR_PREFIX: &str = "NVIDIA GeForce ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemperatureBand {
    Cool,
    Warm,
    Hot,
}

impl TemperatureBand {
    pub fn of(celsius: f64) -> Self {
        if celsius >= HOT_TEMPERATURE_C {
            TemperatureBand::Hot
        } else if celsius >= WARM_TEMPERATURE_C {
            TemperatureBand::Warm
        } else {
            TemperatureBand::Cool
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureBand::Cool => "cool",
            TemperatureBand::Warm => "warm",
            TemperatureBand::Hot => "hot",
        }
    }
}

impl Device {
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_mib <= 0.0 {
            return 0.0;
        }
        self.memory_used_mib / self.memory_total_mib * 100.0
    }

    pub fn is_memory_high(&self) -> bool {
        self.memory_percent() > HIGH_MEMORY_PERCENT
    }

    pub fn temperature_band(&self) -> TemperatureBand {
        TemperatureBand::of(self.temperature)
    }

    pub fn short_name(&self) -> &str {
        self.name.strip_prefix(VENDOR_PREFIX).unwrap_or(&self.name)
    }
}

impl Service {
    pub fn short_model_name(&self) -> &str {
        self.model.rsplit('/').next().unwrap_or(&self.model)
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at
            .map(|started| (now - started).max(Duration::zero()))
    }
}

pub fn format_uptime(uptime: Duration) -> String {
    let minutes = uptime.num_minutes().max(0);
    let hours = minutes / 60;
    let days = hours / 24;
    if days > 0 {
        format!("{days}d {}h", hours % 24)
    } else if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else {
        format!("{minutes}m")
    }
}

pub fn format_context_window(max_tokens: u32) -> String {
    if max_tokens >= 1024 {
        format!("{:.0}K ctx", (f64::from(max_tokens) / 1024.0).round())
    } else {
        format!("{max_tokens} ctx")
    }
}

// Halves round up; `{:.1}` alone rounds them to even.
pub fn format_memory_gib(mib: f64) -> String {
    format!("{:.1}", (mib / 1024.0 * 10.0).round() / 10.0)
}
