//! Build-time constants, as runtime configuration.
//!
//! The original ESP-IDF component wires these through Kconfig
//! (`CONFIG_RTC_STORE_CRITICAL_DATA_SIZE` and friends). Here they are a
//! plain struct the embedding application constructs once at startup.

/// Non-critical stream overflow policy (spec.md §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Symmetric with the critical stream: reject the new record.
    DropNew,
    /// Repeatedly consume the oldest record until the new one fits.
    OverwriteOldest,
}

/// Capacities and thresholds for [`crate::store::PersistentRingStore`].
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Critical-stream capacity in bytes.
    pub critical_size: usize,
    /// Non-critical-stream capacity in bytes.
    pub non_critical_size: usize,
    /// Percent of capacity that must remain free before a low-memory event
    /// fires, i.e. the event fires when `free < (100 - percent)% * size`.
    pub reporting_watermark_percent: u8,
    /// Overflow policy for the non-critical stream.
    pub non_critical_overflow: OverflowPolicy,
}

impl StoreConfig {
    /// Critical-stream low-watermark threshold, in bytes, computed once.
    pub fn critical_watermark(&self) -> usize {
        watermark(self.critical_size, self.reporting_watermark_percent)
    }

    /// Non-critical-stream low-watermark threshold, in bytes, computed once.
    pub fn non_critical_watermark(&self) -> usize {
        watermark(self.non_critical_size, self.reporting_watermark_percent)
    }
}

fn watermark(size: usize, percent: u8) -> usize {
    size * (100 - percent.min(100) as usize) / 100
}

/// Registry table capacities (spec.md §3 "capacity is bounded by a
/// build-time constant").
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Maximum number of registered metrics.
    pub max_metrics: usize,
    /// Maximum number of registered variables.
    pub max_variables: usize,
}

/// Sampler cadence bounds (spec.md §4.E).
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Sampling period. `Duration::ZERO` disables the sampler.
    pub period: std::time::Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period: std::time::Duration::from_secs(30),
        }
    }
}

/// Minimum allowed sampler period (spec.md §4.E: "range 1s-86400s").
pub const SAMPLER_PERIOD_MIN: std::time::Duration = std::time::Duration::from_secs(1);
/// Maximum allowed sampler period (spec.md §4.E: "range 1s-86400s").
pub const SAMPLER_PERIOD_MAX: std::time::Duration = std::time::Duration::from_secs(86_400);

/// Adaptive reporting scheduler bounds (spec.md §4.F).
#[derive(Debug, Clone, Copy)]
pub struct ReporterConfig {
    /// Lower bound of the adaptive period.
    pub min_period: std::time::Duration,
    /// Upper bound of the adaptive period.
    pub max_period: std::time::Duration,
    /// Fixed scratch-buffer size for the encoder (`INSIGHTS_DATA_MAX_SIZE`).
    pub max_document_size: usize,
    /// Watchdog duration for an in-flight send awaiting ack (spec.md: 30s).
    pub ack_timeout: std::time::Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            min_period: std::time::Duration::from_secs(45),
            max_period: std::time::Duration::from_secs(3600),
            max_document_size: 4096,
            ack_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Top-level configuration for an [`crate::agent::Agent`].
#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    /// See [`StoreConfig`].
    pub store: StoreConfig,
    /// See [`RegistryConfig`].
    pub registry: RegistryConfig,
    /// See [`ReporterConfig`].
    pub reporter: ReporterConfig,
}
