//! Clipcast - QUIC clipboard sync server
//!
//! Usage:
//!   cargo run -- server                    # Run with defaults
//!   cargo run -- server --port 4433       # Run on specific port

use std::env;
use std::time::Duration;

use clipcast::{ClipConfig, ClipServer};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(parse_config(&args)).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            return Ok(());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Clipcast - QUIC Clipboard Sync Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the clipboard sync server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 4433)");
    println!("    --max-conn <NUM>    Maximum connections (default: 1000)");
    println!("    --reap-secs <SECS>  Empty-room reap interval (default: 60)");
    println!("    --ack-secs <SECS>   Chunk delivery ack timeout (default: 30)");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_config(args: &[String]) -> ClipConfig {
    let mut config = ClipConfig::default();

    for i in 0..args.len() {
        let Some(value) = args.get(i + 1) else {
            continue;
        };

        match args[i].as_str() {
            "--port" => {
                if let Ok(port) = value.parse::<u16>() {
                    config.bind_addr.set_port(port);
                }
            }
            "--max-conn" => {
                if let Ok(max) = value.parse() {
                    config.max_connections = max;
                }
            }
            "--reap-secs" => {
                if let Ok(secs) = value.parse() {
                    config.reap_interval = Duration::from_secs(secs);
                }
            }
            "--ack-secs" => {
                if let Ok(secs) = value.parse() {
                    config.ack_timeout = Duration::from_secs(secs);
                }
            }
            _ => {}
        }
    }

    config
}

async fn run_server(config: ClipConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = ClipServer::new(config);

    if let Err(e) = server.start().await {
        error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
