use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use gpuwatch_client::{ClientConfig, LiveState, Monitor, TransportKind};
use gpuwatch_core::metrics::{format_context_window, format_memory_gib, format_uptime};
use gpuwatch_core::{DeviceView, ReconnectPolicy};
use std::io;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8000/ws/status";

#[derive(Parser, Debug)]
#[command(name = "gpuwatch", about = "Follow a GPU fleet status endpoint")]
struct Args {
    #[arg(long, env = "GPUWATCH_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
    #[arg(long, env = "GPUWATCH_TRANSPORT", default_value = "push")]
    transport: TransportKind,
    #[arg(long, env = "GPUWATCH_POLL_INTERVAL_MS", default_value_t = 3_000)]
    poll_interval_ms: u64,
    #[arg(long)]
    request_timeout_ms: Option<u64>,
    #[arg(long, env = "GPUWATCH_BACKOFF_BASE_MS", default_value_t = 3_000)]
    backoff_base_ms: u64,
    #[arg(long, env = "GPUWATCH_BACKOFF_GROWTH", default_value_t = 1.5)]
    backoff_growth: f64,
    #[arg(long, env = "GPUWATCH_BACKOFF_MAX_MS", default_value_t = 30_000)]
    backoff_max_ms: u64,
    /// Exit after the first accepted snapshot.
    #[arg(long, default_value_t = false)]
    once: bool,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.endpoint.trim())
            .with_transport(self.transport)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_backoff(ReconnectPolicy {
                base: Duration::from_millis(self.backoff_base_ms),
                growth: self.backoff_growth,
                max: Duration::from_millis(self.backoff_max_ms),
            });
        config.request_timeout = self.request_timeout_ms.map(Duration::from_millis);
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = args.client_config();
    config.validate().context("invalid configuration")?;
    let endpoint = config
        .resolve_endpoint()
        .context("invalid endpoint")?;

    let mut monitor = Monitor::from_config(&config);
    let mut rx = monitor.subscribe();
    monitor.start();
    info!(
        event = "gpuwatch_start",
        endpoint = %endpoint,
        transport = %config.transport
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                info!(
                    event = "fleet_update",
                    status = %state.status,
                    summary = %state.summary()
                );
                for line in render_lines(&state, Utc::now()) {
                    println!("{line}");
                }
                if args.once && state.snapshot.is_some() {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!(event = "gpuwatch_interrupted");
                break;
            }
        }
    }

    monitor.stop();
    let stats = monitor.stats();
    info!(
        event = "gpuwatch_stop",
        sessions_opened = stats.sessions_opened,
        snapshots_accepted = stats.snapshots_accepted,
        decode_failures = stats.decode_failures,
        claim_conflicts = stats.claim_conflicts
    );
    Ok(())
}

fn render_lines(state: &LiveState, now: DateTime<Utc>) -> Vec<String> {
    let mut lines = Vec::with_capacity(state.device_views.len() + 1);
    lines.push(format!("[{}] {}", state.status.label(), state.summary()));
    lines.extend(state.device_views.iter().map(|view| render_device(view, now)));
    lines
}

fn render_device(view: &DeviceView, now: DateTime<Utc>) -> String {
    let device = &view.device;
    let memory_flag = if device.is_memory_high() { " high" } else { "" };
    let mut line = format!(
        "gpu{} {} {:.0}C {} util {:.0}% mem {}/{} GiB ({:.0}%{memory_flag})",
        device.index,
        device.short_name(),
        device.temperature,
        device.temperature_band().as_str(),
        device.utilization_percent,
        format_memory_gib(device.memory_used_mib),
        format_memory_gib(device.memory_total_mib),
        device.memory_percent(),
    );
    match &view.owning_service {
        Some(service) => {
            line.push_str(&format!(
                " -> :{} {} {} {}",
                service.port,
                service.kind,
                service.short_model_name(),
                service.status
            ));
            if let Some(uptime) = service.uptime(now) {
                line.push_str(&format!(" up {}", format_uptime(uptime)));
            }
            if let Some(max_tokens) = service.max_tokens {
                line.push_str(&format!(" {}", format_context_window(max_tokens)));
            }
        }
        None => line.push_str(" idle"),
    }
    line
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = if env_true("GPUWATCH_LOG_STDOUT") {
        BoxMakeWriter::new(io::stdout)
    } else {
        BoxMakeWriter::new(io::stderr)
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gpuwatch_core::{
        build_device_views, ConnectionStatus, Device, Service, ServiceStatus, ServiceType,
        Snapshot,
    };
    use std::sync::Arc;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("gpuwatch").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn flags_build_client_config() {
        let args = parse(&[
            "--endpoint",
            "http://gpu-box:8000/api/status",
            "--transport",
            "poll",
            "--poll-interval-ms",
            "500",
            "--request-timeout-ms",
            "250",
            "--backoff-base-ms",
            "100",
            "--backoff-growth",
            "2",
            "--backoff-max-ms",
            "800",
        ]);
        let config = args.client_config();
        assert_eq!(config.transport, TransportKind::Poll);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.backoff.delay(3), Duration::from_millis(800));
        assert_eq!(
            config.resolve_endpoint().unwrap().as_str(),
            "http://gpu-box:8000/api/status"
        );
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let result = Args::try_parse_from(["gpuwatch", "--transport", "smoke-signals"]);
        assert!(result.is_err());
    }

    #[test]
    fn renders_summary_and_devices() {
        let snapshot = Snapshot {
            devices: vec![
                Device {
                    index: 0,
                    name: "NVIDIA GeForce RTX 4090".to_string(),
                    temperature: 82.0,
                    utilization_percent: 97.0,
                    memory_used_mib: 22_528.0,
                    memory_total_mib: 24_576.0,
                    model: None,
                },
                Device {
                    index: 1,
                    name: "NVIDIA GeForce RTX 4090".to_string(),
                    temperature: 41.0,
                    utilization_percent: 0.0,
                    memory_used_mib: 0.0,
                    memory_total_mib: 24_576.0,
                    model: None,
                },
            ],
            services: vec![Service {
                port: 8001,
                model: "Qwen/Qwen2.5-32B-Instruct".to_string(),
                kind: ServiceType::Llm,
                status: ServiceStatus::Healthy,
                device_indices: vec![0],
                aliases: Vec::new(),
                container: None,
                started_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()),
                max_tokens: Some(32_768),
            }],
        };
        let state = LiveState {
            device_views: build_device_views(&snapshot).into(),
            snapshot: Some(Arc::new(snapshot)),
            status: ConnectionStatus::Connected,
        };
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();

        let lines = render_lines(&state, now);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "[Live] 1 of 2 GPUs active");
        assert_eq!(
            lines[1],
            "gpu0 RTX 4090 82C hot util 97% mem 22.0/24.0 GiB (92% high) -> :8001 llm Qwen2.5-32B-Instruct healthy up 2h 30m 32K ctx"
        );
        assert_eq!(
            lines[2],
            "gpu1 RTX 4090 41C cool util 0% mem 0.0/24.0 GiB (0%) idle"
        );
    }

    #[test]
    fn renders_empty_state_while_connecting() {
        let lines = render_lines(&LiveState::default(), Utc::now());
        assert_eq!(lines, vec!["[...] 0 of 0 GPUs active".to_string()]);
    }
}
