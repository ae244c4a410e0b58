//! Harbormaster - fleet health supervisor
//!
//! Probes hosted apps, restarts failed ones through the platform API,
//! and guards remediation with a per-app circuit breaker.

mod api;
mod armada;
mod bridge;
mod chart;
mod cli;
mod clock;
mod courier;
mod error;
mod ledger;
mod manifest;
mod patrol;
mod platform;
mod restart;
mod runlock;
mod sickbay;
mod warden;

#[cfg(test)]
mod testkit;

use bridge::Bridge;
use cli::{Cli, Commands};
use error::Result;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        // Commands that don't require config
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }
        Commands::Init { force } => {
            if cli.config.exists() && !force {
                eprintln!(
                    "Error: {} already exists. Use -y/--force to overwrite.",
                    cli.config.display()
                );
                std::process::exit(1);
            }
            std::fs::write(&cli.config, manifest::TEMPLATE)?;
            println!("Created {}", cli.config.display());
            println!("Fill in [credentials] and [[apps]], then run 'harbormaster check'.");
            Ok(())
        }

        Commands::Check => {
            let config = manifest::load(&cli.config)?;
            bridge::print_check(&config)
        }

        Commands::Sweep => {
            let config = manifest::load(&cli.config)?;
            block_on(async {
                let (bridge, courier_task) = Bridge::launch(&config)?;
                let result = bridge.sweep().await;
                courier_task.finish().await;

                match result? {
                    Some(counts) => println!(
                        "Swept {} app(s): {} healthy, {} restarted, {} error(s), {} skipped",
                        counts.total, counts.healthy, counts.restarted, counts.errors, counts.skipped
                    ),
                    None => println!("Another sweep is in progress, skipped"),
                }
                Ok(())
            })
        }

        Commands::Status { json } => {
            let config = manifest::load(&cli.config)?;
            block_on(async {
                let (bridge, courier_task) = Bridge::launch(&config)?;
                let result = bridge.status().await;
                courier_task.finish().await;
                bridge::print_status(&result?, config.config.utc_offset(), json)
            })
        }

        Commands::RestartRegion { region, operator } => {
            let config = manifest::load(&cli.config)?;
            block_on(async {
                let (bridge, courier_task) = Bridge::launch(&config)?;
                let apps = match bridge.validate_region(&region) {
                    Ok(apps) => apps,
                    Err(e) => {
                        courier_task.finish().await;
                        return Err(e);
                    }
                };
                println!(
                    "Restart of region {} queued: {} app(s), operator {}",
                    region,
                    apps.len(),
                    operator
                );

                let warden = warden::Warden::new(Arc::new(bridge));
                let handle = warden::WardenHandle::new(&warden);
                let warden_task = tokio::spawn(warden.run());

                let submitted = handle.submit_region_restart(&region, &operator);
                handle.shutdown().await;
                if let Err(e) = warden_task.await {
                    warn!(error = %e, "warden task ended abnormally");
                }
                courier_task.finish().await;
                submitted?;

                println!("Region {} done, see notifications for the outcome", region);
                Ok(())
            })
        }

        Commands::RestartAll { operator } => {
            let config = manifest::load(&cli.config)?;
            block_on(async {
                let (bridge, courier_task) = Bridge::launch(&config)?;
                let outcomes = bridge.restart_everything(&operator).await;
                courier_task.finish().await;

                for outcome in &outcomes {
                    match &outcome.detail {
                        Some(detail) => println!(
                            "{:<16} {:<8} {:?}: {}",
                            outcome.app, outcome.region, outcome.status, detail
                        ),
                        None => println!(
                            "{:<16} {:<8} {:?}",
                            outcome.app, outcome.region, outcome.status
                        ),
                    }
                }
                Ok(())
            })
        }

        Commands::Serve { listen, interval } => {
            let config = manifest::load(&cli.config)?;
            let listen = listen.unwrap_or_else(|| config.config.listen.clone());
            let interval =
                Duration::from_secs(interval.unwrap_or(config.config.sweep_interval).max(1));

            block_on(async {
                let (bridge, courier_task) = Bridge::launch(&config)?;
                let bridge = Arc::new(bridge);

                let warden = warden::Warden::new(Arc::clone(&bridge));
                let handle = warden::WardenHandle::new(&warden);
                let warden_task = tokio::spawn(warden.run());

                let (stop_tx, stop_rx) = watch::channel(false);
                let timer_task = tokio::spawn(sweep_timer(Arc::clone(&bridge), interval, stop_rx));

                let listener = tokio::net::TcpListener::bind(&listen).await?;
                info!(%listen, interval_secs = interval.as_secs(), "harbormaster serving");
                println!("Listening on {}. Press Ctrl+C to stop.", listen);

                let router = api::build_router(api::ApiState {
                    bridge,
                    warden: handle.clone(),
                });
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown_signal())
                    .await;

                println!("\nShutting down...");

                // Let an in-flight sweep finish so its lock is released
                let _ = stop_tx.send(true);
                if let Err(e) = timer_task.await {
                    warn!(error = %e, "sweep timer ended abnormally");
                }

                // Queued region batches drain before exit
                handle.shutdown().await;
                if let Err(e) = warden_task.await {
                    warn!(error = %e, "warden task ended abnormally");
                }
                courier_task.finish().await;

                served?;
                Ok(())
            })
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` selects debug
fn init_logging(verbose: bool) {
    let default = if verbose {
        "harbormaster=debug"
    } else {
        "harbormaster=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Run a command body on a fresh multi-threaded runtime
fn block_on<F>(body: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| error::Error::Io(std::io::Error::other(e)))?;
    rt.block_on(body)
}

/// Run a guarded sweep on every tick until told to stop
async fn sweep_timer(bridge: Arc<Bridge>, every: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        match bridge.sweep().await {
            Ok(Some(counts)) => info!(
                total = counts.total,
                healthy = counts.healthy,
                restarted = counts.restarted,
                errors = counts.errors,
                skipped = counts.skipped,
                "scheduled sweep finished"
            ),
            Ok(None) => info!("scheduled sweep skipped, lock held"),
            Err(e) => warn!(error = %e, "scheduled sweep failed"),
        }
        if *stop.borrow() {
            break;
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C, serving until killed");
        std::future::pending::<()>().await;
    }
}
