use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vitals::action::ViewAction;
use vitals::config::{Config, load_config, load_config_from_path};
use vitals::format::{format_bytes, format_duration, format_rate, pad_unicode};
use vitals::logging::init_tracing;
use vitals::model::history::HistoricalDataPoint;
use vitals::model::view::{ProcessView, SortKey, SortState, ViewState};
use vitals::monitor::{Monitor, MonitorEvent};
use vitals::system::collector::{Collector, SysinfoProvider};
use vitals::system::process::Process;
use vitals::system::provider::{ProcessController, SnapshotProvider};
use vitals::system::replay::ReplayProvider;
use vitals::system::snapshot::BatteryReading;

#[derive(Parser)]
#[command(
    name = "vitals",
    about = "Samples system telemetry and prints rates, history and the process table"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refresh rate in milliseconds
    #[arg(long)]
    refresh_rate: Option<u64>,

    /// Include threads in the process list
    #[arg(long, default_value_t = false)]
    show_threads: bool,

    /// Stop after this many samples (0 runs until Ctrl+C)
    #[arg(long, default_value_t = 0)]
    samples: u64,

    /// Replay snapshots from a JSON-lines file instead of reading the system
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Only show processes whose name contains this text (case-insensitive)
    #[arg(long)]
    filter: Option<String>,

    /// Sort column: pid, cpu, memory, memory-percent, run-time, cpu-time,
    /// disk-read, disk-write, name, user, status, command
    #[arg(long)]
    sort: Option<String>,

    /// Show the process hierarchy instead of a flat table
    #[arg(long, default_value_t = false)]
    tree: bool,

    /// Number of process rows to print per sample
    #[arg(long, default_value_t = 15)]
    top: usize,

    /// Log filter when RUST_LOG is unset, e.g. `debug` or `vitals=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);
    init_tracing(&config.logging.level, config.logging.json)?;

    let view = initial_view(&config, &cli)?;

    match &cli.replay {
        Some(path) => {
            let provider = ReplayProvider::from_jsonl(path)?;
            info!(path = %path.display(), snapshots = provider.remaining(), "replaying snapshots");
            run(Arc::new(provider), &config, &view, &cli, true).await
        }
        None => {
            let os = Collector::os_info();
            info!(
                os = %os.name,
                version = %os.version,
                kernel = %os.kernel_version,
                host = %os.hostname,
                uptime = %format_duration(os.uptime_seconds),
                "sampling local system"
            );
            let provider = SysinfoProvider::new(config.general.show_threads);
            run(Arc::new(provider), &config, &view, &cli, false).await
        }
    }
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(rate) = cli.refresh_rate {
        config.general.refresh_rate_ms = rate;
    }
    if cli.show_threads {
        config.general.show_threads = true;
    }
    if cli.tree {
        config.view.tree_mode = true;
    }
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.json = true;
    }

    config
}

fn initial_view(config: &Config, cli: &Cli) -> Result<ViewState> {
    let mut view = config.view_state();
    if let Some(ref sort) = cli.sort {
        let key: SortKey = sort.parse()?;
        view.sort = SortState::new(key, config.view.descending);
    }
    if let Some(ref filter) = cli.filter {
        view.dispatch(ViewAction::UpdateFilter(filter.clone()));
    }
    Ok(view)
}

async fn run<P>(
    provider: Arc<P>,
    config: &Config,
    view: &ViewState,
    cli: &Cli,
    stop_on_failure: bool,
) -> Result<()>
where
    P: SnapshotProvider + ProcessController + Send + Sync + 'static,
{
    let mut monitor = Monitor::new(provider, config.monitor_settings());
    let (tx, mut rx) = mpsc::unbounded_channel();
    monitor.start(move |event| {
        let _ = tx.send(event);
    })?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut samples = 0u64;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            event = rx.recv() => match event {
                Some(MonitorEvent::Sample { snapshot, point }) => {
                    samples += 1;
                    info!(
                        cycle = samples,
                        processes = snapshot.processes.len(),
                        cpu = point.cpu_percent,
                        memory = point.memory_percent,
                        "sample"
                    );
                    print_summary(&point, &monitor.history(Some(config.history.chart_window)));
                    if let Some(battery) = &snapshot.battery {
                        print_battery(battery);
                    }
                    print_processes(&monitor.process_view(view), cli.top);
                    if cli.samples > 0 && samples >= cli.samples {
                        break;
                    }
                }
                Some(MonitorEvent::Failed(err)) => {
                    if stop_on_failure {
                        info!(samples, "replay finished: {err}");
                        break;
                    }
                    warn!("sampling cycle failed: {err:#}");
                }
                None => break,
            }
        }
    }

    monitor.stop();
    Ok(())
}

fn print_summary(point: &HistoricalDataPoint, window: &[HistoricalDataPoint]) {
    let avg_cpu = if window.is_empty() {
        0.0
    } else {
        window.iter().map(|p| f64::from(p.cpu_percent)).sum::<f64>() / window.len() as f64
    };
    println!(
        "cpu {:5.1}% (avg {:5.1}% over {} samples)  mem {:5.1}%  swap {:5.1}%",
        point.cpu_percent,
        avg_cpu,
        window.len(),
        point.memory_percent,
        point.swap_percent
    );
    println!(
        "disk r {} w {}  net rx {} tx {}",
        format_rate(point.disk_read_bytes_per_sec),
        format_rate(point.disk_write_bytes_per_sec),
        format_rate(point.network_rx_bytes_per_sec),
        format_rate(point.network_tx_bytes_per_sec)
    );
}

fn print_battery(battery: &BatteryReading) {
    let remaining = battery
        .time_to_empty
        .or(battery.time_to_full)
        .map(|minutes| format!("  {} left", format_duration((minutes * 60.0) as u64)))
        .unwrap_or_default();
    println!(
        "battery {:5.1}% {:?}  health {:5.1}%{remaining}",
        battery.percentage,
        battery.state,
        battery.health_percent()
    );
}

fn print_processes(view: &ProcessView, top: usize) {
    println!(
        "{:>7} {} {:>6} {:>9} {} {}",
        "PID",
        pad_unicode("NAME", 32),
        "CPU%",
        "MEM",
        pad_unicode("USER", 10),
        "STATE"
    );
    match view {
        ProcessView::Flat(rows) => {
            for process in rows.iter().take(top) {
                print_row(process, &process.name);
            }
        }
        ProcessView::Tree(rows) => {
            for row in rows.iter().take(top) {
                let marker = match (row.has_children, row.expanded) {
                    (false, _) => ' ',
                    (true, true) => '\u{25be}',
                    (true, false) => '\u{25b8}',
                };
                let label = format!("{}{marker} {}", "  ".repeat(row.depth), row.process.name);
                print_row(&row.process, &label);
            }
        }
    }
    if view.len() > top {
        println!("... {} more", view.len() - top);
    }
    println!();
}

fn print_row(process: &Process, label: &str) {
    println!(
        "{:>7} {} {:>6.1} {:>9} {} {}",
        process.pid,
        pad_unicode(label, 32),
        process.cpu_percent,
        format_bytes(process.memory_bytes),
        pad_unicode(&process.user, 10),
        process.status
    );
}
