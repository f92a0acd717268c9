//! `spindle-cli` – Spindle motor controller
//!
//! This binary is the entry point for a single-axis controller.  It:
//!
//! 1. Initialises logging (and OTLP export when configured).
//! 2. Loads `~/.spindle/config.toml` (or `$SPINDLE_CONFIG`), writing the
//!    defaults there on first run, applies `SPINDLE_*` overrides and
//!    validates the result.
//! 3. Constructs the controller on the simulation driver, listens for
//!    encrypted UDP commands and streams the shaft angle to the observer.
//! 4. Intercepts **Ctrl-C** to request an orderly stop; teardown zeroes the
//!    motor and releases the device before exiting.

mod config;

use colored::Colorize;
use spindle_hal::SimMotor;
use spindle_middleware::ShiftCipher;
use spindle_runtime::{Controller, init_tracing};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // Must outlive the runtime so pending spans are flushed on exit.
    let _telemetry = init_tracing("spindle");

    print_banner();

    let cfg = match config::load() {
        Ok((cfg, Some(path))) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok((cfg, None)) => {
            let path = config::config_path();
            match config::save_to(&config::Config::default(), &path) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => warn!(error = %e, "could not write default config"),
            }
            cfg
        }
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = cfg.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }
    info!(config = ?cfg, "configuration");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(serve(cfg))
}

async fn serve(cfg: config::Config) -> ExitCode {
    let driver = SimMotor::new(cfg.sim_counts_per_second);
    let cipher = Arc::new(ShiftCipher::new(cfg.cipher_key.as_bytes()));

    let controller = match Controller::new(cfg.to_controller_config(), Box::new(driver), cipher).await
    {
        Ok(controller) => controller,
        Err(e) => {
            error!(error = %e, "controller setup failed");
            return ExitCode::FAILURE;
        }
    };
    drop(cfg);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let lifecycle = controller.lifecycle().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping motor …".yellow().bold());
        lifecycle.request_stop();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!(
        "  Listening for commands on {}\n",
        controller.command_addr().to_string().bold().cyan()
    );

    match controller.run().await {
        Ok(teardown) => {
            println!("{}", "  ✓ Motor stopped and device released.".green());
            info!(?teardown, "exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "controller run failed");
            controller.shutdown();
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____     _         ____    "#.bold().cyan());
    println!("{}", r#"  / __/__  (_)__  ___/ / /__  "#.bold().cyan());
    println!("{}", r#" _\ \/ _ \/ / _ \/ _  / / -_) "#.bold().cyan());
    println!("{}", r#"/___/ .__/_/_//_/\_,_/_/\__/  "#.bold().cyan());
    println!("{}", r#"   /_/                        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Spindle".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Single-axis motor position controller");
    println!();
}
