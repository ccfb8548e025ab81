//! Convenience macros for performance tracing

/// Create a [`crate::performance::PerformanceSpan`] using the process-wide
/// threshold, optionally recording extra fields on the timed span.
///
/// ```rust
/// use accel_tracing::perf_span;
///
/// {
///     let _span = perf_span!("to_binary", bytes = 4096);
///     // ... operation code ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::from_config($name)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let name = $name;
        let span = $crate::__private_tracing::debug_span!(
            "perf",
            name = %name,
            $($field = $value),+
        );
        $crate::performance::PerformanceSpan::with_span(span, name, $crate::performance::default_threshold_us())
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_perf_span_macro() {
        let span = perf_span!("copy_to_device");
        assert_eq!(span.name(), "copy_to_device");
    }

    #[test]
    fn test_perf_span_with_fields() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = perf_span!("run", replicas = 2, arguments = 3);
            assert_eq!(span.name(), "run");

            // The completion event is logged inside this span, so the
            // fields must be on it
            let timed = span.span();
            assert!(timed.field("name").is_some());
            assert!(timed.field("replicas").is_some());
            assert!(timed.field("arguments").is_some());
        });
    }
}
