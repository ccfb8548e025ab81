//! Performance spans and standard transfer/execution events
//!
//! ```rust
//! use accel_tracing::performance::{record_transfer, PerformanceSpan, TransferDirection};
//!
//! let span = PerformanceSpan::new("buffer_from_binary", Some(100));
//! // ... work ...
//! drop(span); // logged only if it took at least 100μs
//!
//! record_transfer(4096, TransferDirection::HostToDevice, 250);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// `u64::MAX` means no threshold
static THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Apply process-wide performance span settings
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    ENABLED.store(enabled, Ordering::Relaxed);
    THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Threshold set by [`configure`]
pub fn default_threshold_us() -> Option<u64> {
    match THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        threshold => Some(threshold),
    }
}

/// RAII timer that logs its duration when dropped
///
/// Nothing is logged when performance tracing is disabled or the duration is
/// below the threshold.
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, name, threshold_us)
    }

    /// Span using the process-wide threshold
    pub fn from_config(name: impl Into<String>) -> Self {
        Self::new(name, default_threshold_us())
    }

    pub fn with_level(level: Level, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };
        Self::with_span(span, name, threshold_us)
    }

    /// Time an existing span, e.g. one carrying extra fields
    pub fn with_span(span: tracing::Span, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self {
            name: name.into(),
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// The span the completion event is logged in
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.map_or(true, |t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Direction of a data transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
    Infeed,
    Outfeed,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransferDirection::HostToDevice => "H2D",
            TransferDirection::DeviceToHost => "D2H",
            TransferDirection::DeviceToDevice => "D2D",
            TransferDirection::Infeed => "infeed",
            TransferDirection::Outfeed => "outfeed",
        };
        f.write_str(label)
    }
}

fn bandwidth_mbps(bytes: usize, duration_us: u64) -> f64 {
    if duration_us > 0 {
        (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    }
}

/// Record a data transfer with its bandwidth
pub fn record_transfer(bytes: usize, direction: TransferDirection, duration_us: u64) {
    if !is_enabled() {
        return;
    }
    let bandwidth = bandwidth_mbps(bytes, duration_us);
    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        direction = %direction,
        duration_us = duration_us,
        bandwidth_mbps = bandwidth,
        "data_transfer"
    );
}

/// Record one program run across `replicas` replicas
pub fn record_execution(program: &str, replicas: usize, outputs: usize, duration_us: u64) {
    if !is_enabled() {
        return;
    }
    tracing::debug!(
        event = "execution",
        program = program,
        replicas = replicas,
        outputs = outputs,
        duration_us = duration_us,
        duration_ms = duration_us as f64 / 1000.0,
        "program_execution"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_performance_span_creation() {
        let span = PerformanceSpan::new("transfer", Some(1000));
        assert_eq!(span.name(), "transfer");
        assert_eq!(span.threshold_us, Some(1000));
    }

    #[test]
    fn test_performance_span_elapsed() {
        let span = PerformanceSpan::with_level(Level::INFO, "sleep", None);
        thread::sleep(Duration::from_millis(10));
        assert!(span.elapsed_us() >= 10_000);
    }

    #[test]
    fn test_bandwidth_calculation() {
        // 1 MiB in 1ms
        let bandwidth = bandwidth_mbps(1024 * 1024, 1000);
        assert!((bandwidth - 1000.0).abs() < 0.01);
        assert_eq!(bandwidth_mbps(10, 0), 0.0);
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(TransferDirection::HostToDevice.to_string(), "H2D");
        assert_eq!(TransferDirection::Outfeed.to_string(), "outfeed");
    }

    #[test]
    fn test_record_events() {
        record_transfer(4096, TransferDirection::DeviceToHost, 250);
        record_execution("add", 1, 1, 40);
    }
}
