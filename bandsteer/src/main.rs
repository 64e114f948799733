// Band Steering Daemon

use anyhow::{Context, Result};
use bandsteer::{
    bm::{stats::GroupReport, steering::CsState, Engine, ReportSink, Tunables},
    config::load_config,
    dump_file,
    executor::{BeaconReportRequest, BtmRequest, Driver, DriverError},
    types::{AclPolicy, MacAddr},
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::time::{sleep_until, Instant};

/// Longest sleep between engine runs when nothing is scheduled
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "bandsteerd")]
#[command(about = "Wi-Fi band steering daemon", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/bandsteer/config.toml")]
    config: PathBuf,
}

/// Driver logging every request instead of sending it to a radio
struct LogDriver;

impl Driver for LogDriver {
    fn apply_acl(
        &mut self,
        vif_name: &str,
        policy: AclPolicy,
        acl: &[MacAddr],
    ) -> Result<(), DriverError> {
        log::info!(
            "Driver: acl on {}: {:?} [{}]",
            vif_name,
            policy,
            acl.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(",")
        );
        Ok(())
    }

    fn submit_btm(&mut self, req: &BtmRequest) -> Result<(), DriverError> {
        log::info!(
            "Driver: btm request to {} on {} with {} neighbor(s), disassoc imminent: {}",
            req.sta,
            req.vif_name,
            req.neighbors.len(),
            req.disassoc_imminent
        );
        Ok(())
    }

    fn deauth(&mut self, vif_name: &str, sta: &MacAddr, reason: u16) -> Result<(), DriverError> {
        log::info!("Driver: deauth {} on {} (reason {})", sta, vif_name, reason);
        Ok(())
    }

    fn request_beacon_report(&mut self, req: &BeaconReportRequest) -> Result<(), DriverError> {
        log::info!(
            "Driver: beacon report request to {} on {} for op class {} channel {}",
            req.sta,
            req.vif_name,
            req.op_class,
            req.channel
        );
        Ok(())
    }
}

/// Report sink logging reports and client steering states
struct LogSink;

impl ReportSink for LogSink {
    fn send_report(&mut self, report: &GroupReport) {
        log::info!(
            "Report: group {} with {} client(s)",
            report.group_id,
            report.clients.len()
        );
        for client in &report.clients {
            for band in &client.bands {
                log::debug!(
                    "Report: {} on {} ({}): {} connect(s), {} event(s)",
                    client.addr,
                    band.vif_name,
                    band.radio_type.as_str(),
                    band.stats.connects,
                    band.stats.events.len()
                );
            }
        }
    }

    fn cs_state(&mut self, sta: &MacAddr, state: CsState) {
        log::info!("Client steering: {} is {}", sta, state);
    }
}

fn main() -> Result<()> {
    // The engine is single-threaded and not Send
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .enable_io()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.general.log_level),
    )
    .init();

    log::info!("Starting bandsteer daemon");

    let tunables = Tunables::from(&config.steering);
    log::info!(
        "Report interval: {}s, BTM rate limit: {}s, deauth delay: {}s",
        tunables.report_interval.as_secs(),
        tunables.btm_rate_limit.as_secs(),
        tunables.deauth_delay.as_secs()
    );
    let dump_path = PathBuf::from(&config.general.dump_path);

    let mut engine = Engine::new(tunables, Box::new(LogDriver), Box::new(LogSink));

    // Set up signal handlers for graceful shutdown and dumps
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to set up SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to set up SIGINT handler")?;
    let mut sigusr1 = signal::unix::signal(signal::unix::SignalKind::user_defined1())
        .context("Failed to set up SIGUSR1 handler")?;

    log::info!("Daemon started successfully");

    // Engine time is measured from startup
    let start = Instant::now();

    // Main event loop
    loop {
        let now = start.elapsed();
        let wake = match engine.next_deadline() {
            Some(at) => at.max(now).min(now + IDLE_POLL_INTERVAL),
            None => now + IDLE_POLL_INTERVAL,
        };

        tokio::select! {
            // Shutdown signals
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT");
                break;
            }

            // Dump request
            _ = sigusr1.recv() => {
                let dump = engine.dump(start.elapsed());
                log::info!("Engine dump:\n{}", dump);
                if let Err(e) = dump_file::write_dump(&dump_path, &dump) {
                    log::warn!("Failed to write dump file: {}", e);
                }
            }

            // Timers and pending work
            _ = sleep_until(start + wake) => {
                engine.advance(start.elapsed());
            }
        }
    }

    // Clean up dump file
    dump_file::cleanup(&dump_path);

    log::info!("Shutdown complete");
    Ok(())
}
