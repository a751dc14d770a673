//! Pipeline instrumentation
//!
//! Components receive an `Arc<dyn MetricsSink>` at construction and wrap their
//! public operations with [`instrumented`]. Production wiring uses
//! [`PrometheusMetrics`]; tests and tools can pass [`NoopMetrics`].
//!
//! Besides latency and errors, every instrumented call samples the process CPU
//! and resident memory into gauges labelled by operation.

use crate::error::{ErrorKind, Result};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};

/// Instrumented pipeline operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ProcessPrice,
    SmaCalculation,
    GenerateSignal,
    CreateMarketOrder,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::ProcessPrice,
        Operation::SmaCalculation,
        Operation::GenerateSignal,
        Operation::CreateMarketOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ProcessPrice => "process_price",
            Operation::SmaCalculation => "sma_calculation",
            Operation::GenerateSignal => "generate_signal",
            Operation::CreateMarketOrder => "create_market_order",
        }
    }
}

pub trait MetricsSink: Send + Sync {
    fn observe_latency(&self, operation: Operation, elapsed: Duration);

    fn record_error(&self, operation: Operation, kind: ErrorKind);

    /// Connection or timeout failure where the data in flight was dropped
    fn record_data_loss(&self, operation: Operation);

    /// Sample process CPU and memory after `operation` ran
    fn record_resources(&self, _operation: Operation) {}
}

/// CPU and memory of the current process
struct ProcessSampler {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessSampler {
    fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("Process resource metrics unavailable: {}", e);
                None
            }
        };
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }

    /// CPU percent since the previous sample, and resident memory in bytes
    fn sample(&self) -> Option<(f32, u64)> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process(pid) {
            return None;
        }
        system
            .process(pid)
            .map(|process| (process.cpu_usage(), process.memory()))
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe_latency(&self, _operation: Operation, _elapsed: Duration) {}

    fn record_error(&self, _operation: Operation, _kind: ErrorKind) {}

    fn record_data_loss(&self, _operation: Operation) {}
}

/// Prometheus-backed sink with its own registry
pub struct PrometheusMetrics {
    registry: Registry,
    latency: HistogramVec,
    errors: IntCounterVec,
    data_loss: IntCounterVec,
    cpu_usage: GaugeVec,
    memory_usage: IntGaugeVec,
    sampler: ProcessSampler,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let latency = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Time spent processing operation",
            ),
            &["operation_name"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("operation_errors_total", "Number of errors per operation"),
            &["operation_name", "error_type"],
        )?;
        let data_loss = IntCounterVec::new(
            Opts::new("data_loss_total", "Number of data loss events"),
            &["operation_name"],
        )?;

        let cpu_usage = GaugeVec::new(
            Opts::new("cpu_usage_percent", "CPU usage percentage per operation"),
            &["operation_name"],
        )?;
        let memory_usage = IntGaugeVec::new(
            Opts::new("memory_usage_bytes", "Memory usage in bytes per operation"),
            &["operation_name"],
        )?;

        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(data_loss.clone()))?;
        registry.register(Box::new(cpu_usage.clone()))?;
        registry.register(Box::new(memory_usage.clone()))?;

        Ok(Self {
            registry,
            latency,
            errors,
            data_loss,
            cpu_usage,
            memory_usage,
            sampler: ProcessSampler::new(),
        })
    }

    /// Text exposition format of every registered metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn latency_count(&self, operation: Operation) -> u64 {
        self.latency
            .with_label_values(&[operation.as_str()])
            .get_sample_count()
    }

    pub fn error_count(&self, operation: Operation, kind: ErrorKind) -> u64 {
        self.errors
            .with_label_values(&[operation.as_str(), kind.as_str()])
            .get()
    }

    pub fn data_loss_count(&self, operation: Operation) -> u64 {
        self.data_loss
            .with_label_values(&[operation.as_str()])
            .get()
    }

    pub fn cpu_usage(&self, operation: Operation) -> f64 {
        self.cpu_usage.with_label_values(&[operation.as_str()]).get()
    }

    pub fn memory_usage(&self, operation: Operation) -> i64 {
        self.memory_usage
            .with_label_values(&[operation.as_str()])
            .get()
    }

    /// One line per operation, for the shutdown summary
    pub fn summary(&self) -> Vec<String> {
        Operation::ALL
            .iter()
            .map(|op| {
                let histogram = self.latency.with_label_values(&[op.as_str()]);
                let count = histogram.get_sample_count();
                let avg_ms = if count > 0 {
                    histogram.get_sample_sum() / count as f64 * 1000.0
                } else {
                    0.0
                };
                format!(
                    "{}: {} calls, avg {:.2}ms, {} data loss, cpu {:.1}%, mem {:.1}MB",
                    op.as_str(),
                    count,
                    avg_ms,
                    self.data_loss_count(*op),
                    self.cpu_usage(*op),
                    self.memory_usage(*op) as f64 / 1024.0 / 1024.0
                )
            })
            .collect()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn observe_latency(&self, operation: Operation, elapsed: Duration) {
        self.latency
            .with_label_values(&[operation.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    fn record_error(&self, operation: Operation, kind: ErrorKind) {
        self.errors
            .with_label_values(&[operation.as_str(), kind.as_str()])
            .inc();
    }

    fn record_data_loss(&self, operation: Operation) {
        self.data_loss.with_label_values(&[operation.as_str()]).inc();
    }

    fn record_resources(&self, operation: Operation) {
        let Some((cpu_percent, memory_bytes)) = self.sampler.sample() else {
            return;
        };
        let label = [operation.as_str()];
        self.cpu_usage
            .with_label_values(&label)
            .set(f64::from(cpu_percent));
        self.memory_usage
            .with_label_values(&label)
            .set(i64::try_from(memory_bytes).unwrap_or(i64::MAX));
    }
}

/// Time `fut` and record its outcome against `operation`
pub async fn instrumented<T, F>(sink: &dyn MetricsSink, operation: Operation, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    sink.observe_latency(operation, started.elapsed());
    sink.record_resources(operation);

    if let Err(e) = &result {
        sink.record_error(operation, e.kind());
        if e.is_data_loss() {
            sink.record_data_loss(operation);
        }
        tracing::debug!(operation = operation.as_str(), error = %e, "Operation failed");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    #[tokio::test]
    async fn test_instrumented_records_latency_and_errors() {
        let metrics = PrometheusMetrics::new().unwrap();

        let ok = instrumented(&metrics, Operation::ProcessPrice, async { Ok(1) }).await;
        assert!(ok.is_ok());

        let failed: Result<()> = instrumented(&metrics, Operation::ProcessPrice, async {
            Err(PipelineError::InvalidInput("price must be positive".into()))
        })
        .await;
        assert!(failed.is_err());

        assert_eq!(metrics.latency_count(Operation::ProcessPrice), 2);
        assert_eq!(
            metrics.error_count(Operation::ProcessPrice, ErrorKind::InvalidInput),
            1
        );
        assert_eq!(metrics.data_loss_count(Operation::ProcessPrice), 0);
    }

    #[tokio::test]
    async fn test_timeouts_count_as_data_loss() {
        let metrics = PrometheusMetrics::new().unwrap();

        let _ = instrumented::<(), _>(&metrics, Operation::CreateMarketOrder, async {
            Err(PipelineError::Timeout {
                operation: "gateway.place",
                timeout: Duration::from_secs(10),
            })
        })
        .await;

        assert_eq!(metrics.data_loss_count(Operation::CreateMarketOrder), 1);
        assert_eq!(
            metrics.error_count(Operation::CreateMarketOrder, ErrorKind::TransientIo),
            1
        );
    }

    #[test]
    fn test_render_exposes_metric_families() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.observe_latency(Operation::GenerateSignal, Duration::from_millis(3));

        let text = metrics.render().unwrap();
        assert!(text.contains("operation_latency_seconds"));
        assert!(text.contains("generate_signal"));
    }

    #[tokio::test]
    async fn test_instrumented_samples_process_resources() {
        let metrics = PrometheusMetrics::new().unwrap();
        assert_eq!(metrics.memory_usage(Operation::SmaCalculation), 0);

        instrumented(&metrics, Operation::SmaCalculation, async { Ok(()) })
            .await
            .unwrap();

        assert!(metrics.memory_usage(Operation::SmaCalculation) > 0);
        assert!(metrics.cpu_usage(Operation::SmaCalculation) >= 0.0);
        // Only the operation that ran is sampled
        assert_eq!(metrics.memory_usage(Operation::ProcessPrice), 0);

        let text = metrics.render().unwrap();
        assert!(text.contains("cpu_usage_percent"));
        assert!(text.contains("memory_usage_bytes"));
    }

    #[test]
    fn test_summary_covers_every_operation() {
        let metrics = PrometheusMetrics::new().unwrap();
        let summary = metrics.summary();
        assert_eq!(summary.len(), Operation::ALL.len());
        assert!(summary[0].starts_with("process_price"));
    }
}
