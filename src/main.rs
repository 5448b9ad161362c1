//! Moisture Bridge - Main Process
//!
//! Reads soil moisture readings from a serial-connected board and:
//! 1. Rescales each raw reading to a percentage
//! 2. Stores the latest value in the document store
//! 3. Sends a push alert when moisture drops below the threshold
//! 4. Serves the latest value and token registration over HTTP
//!
//! Usage:
//!   cargo run --release                                  # bridge.toml + PostgreSQL
//!   cargo run --release -- --config /etc/bridge.toml
//!   cargo run --release -- --serial /dev/ttyACM0 --port 8080
//!   cargo run --release -- --memory-store                # no database
//!
//! Environment:
//!   DATABASE_URL     - PostgreSQL connection string
//!   FCM_PROJECT_ID   - Firebase project for push alerts (optional)
//!   FCM_ACCESS_TOKEN - OAuth access token for FCM (optional)
//!   RUST_LOG         - log filter (default: info)

use moisture_bridge::bridge::{Bridge, StoreBackend};
use moisture_bridge::config::{self, DEFAULT_CONFIG_PATH};
use std::env;

fn usage(program: &str) -> String {
    format!(
        "Usage: {} [--config PATH] [--serial DEVICE] [--port PORT] [--memory-store]",
        program
    )
}

fn main() {
    // Info by default; RUST_LOG overrides
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    println!("🌱 Moisture Bridge");
    println!("==================\n");

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut serial_override: Option<String> = None;
    let mut port_override: Option<u16> = None;
    let mut backend = StoreBackend::Postgres;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "--serial" | "--port" if i + 1 >= args.len() => {
                eprintln!("Error: {} requires a value", args[i]);
                eprintln!("{}", usage(&args[0]));
                std::process::exit(1);
            }
            "--config" => {
                config_path = args[i + 1].clone();
                i += 2;
            }
            "--serial" => {
                serial_override = Some(args[i + 1].clone());
                i += 2;
            }
            "--port" => {
                match args[i + 1].parse() {
                    Ok(port) => port_override = Some(port),
                    Err(_) => {
                        eprintln!("Error: --port expects a number, got {}", args[i + 1]);
                        std::process::exit(1);
                    }
                }
                i += 2;
            }
            "--memory-store" => {
                backend = StoreBackend::Memory;
                i += 1;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!("{}", usage(&args[0]));
                std::process::exit(1);
            }
        }
    }

    // Load configuration and apply overrides
    let mut config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ {}\n", e);
            std::process::exit(1);
        }
    };
    if let Some(path) = serial_override {
        config.serial.path = path;
    }
    if let Some(port) = port_override {
        config.http.port = port;
    }

    println!("📊 Initializing bridge...");
    let bridge = match Bridge::initialize(config, backend) {
        Ok(bridge) => bridge,
        Err(e) => {
            eprintln!("\n❌ Initialization failed: {}\n", e);
            std::process::exit(1);
        }
    };
    println!("✓ Bridge initialized");
    println!("   Serial: {} @ {} baud", bridge.config().serial.path, bridge.config().serial.baud_rate);
    println!("   HTTP:   http://0.0.0.0:{}", bridge.config().http.port);
    println!(
        "   Alert:  below {}% (cooldown {} min)",
        bridge.config().alert.threshold_percent,
        bridge.config().alert.cooldown_minutes
    );
    println!("   Press Ctrl+C to stop\n");

    let stats = bridge.run();
    println!(
        "\nBridge stopped after {} serial lines ({} stored, {} discarded, {} source errors)",
        stats.lines, stats.stored, stats.discarded, stats.source_errors
    );
}
