use anyhow::{bail, Result};
use clawgate_app::commands;
use clawgate_app::config::{Config, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;

const USAGE: &str = "\
Usage: clawgate [--config <path>] <command>

Commands:
  prompt <text...>  Send one prompt and print the reply
  repl              Interactive session over the message bus
  gateway           Serve the terminal transport and status endpoint
  health            Check the configured backend";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if pos + 1 >= args.len() {
            bail!("--config requires a path\n\n{}", USAGE);
        }
        config_path = PathBuf::from(args.remove(pos + 1));
        args.remove(pos);
    }

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {:#}", e);
            return Err(e);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(config.log_level()?)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match args.first().map(String::as_str) {
        Some("prompt") => {
            let text = args[1..].join(" ");
            if text.trim().is_empty() {
                bail!("prompt requires text\n\n{}", USAGE);
            }
            commands::prompt::run(&config, &text).await
        }
        Some("repl") | None => commands::repl::run(&config).await,
        Some("gateway") => commands::gateway::run(&config).await,
        Some("health") => commands::health::run(&config).await,
        Some("help") | Some("--help") | Some("-h") => {
            println!("{}", USAGE);
            Ok(())
        }
        Some(other) => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}
