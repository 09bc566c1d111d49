mod serve;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::config::{AppConfig, default_config_path};
use crate::core::terminal::{self, print_error, print_status};
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    println!(" {}", style("Commands").bold().underlined());
    for (cmd, desc) in [
        ("serve", "Run the API server and the workflow poller"),
        ("config", "Print the effective configuration (secrets masked)"),
        ("help", "Show this help"),
    ] {
        println!("   {:<10} {}", style(cmd).green(), style(desc).dim());
    }

    println!();
    println!(" {}", style("Options").bold().underlined());
    for (flag, desc) in [
        ("--config <path>", "Config file (default: <data dir>/agentgate.toml)"),
        ("--api-host <host>", "Override server.host"),
        ("--api-port <port>", "Override server.port"),
    ] {
        println!("   {:<20} {}", style(flag).cyan(), style(desc).dim());
    }

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("agentgate").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeFlags {
    pub config_path: Option<PathBuf>,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> ServeFlags {
    let mut flags = ServeFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-port" => {
                if i + 1 < args.len() {
                    flags.api_port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    flags.api_host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flags
}

impl ServeFlags {
    fn config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| default_config_path(&NativePlatform::data_dir()))
    }

    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.api_host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.api_port {
            config.server.port = port;
        }
    }

    pub(crate) async fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config_path()).await?;
        self.apply(&mut config);
        Ok(config)
    }
}

async fn print_config(flags: &ServeFlags) -> Result<()> {
    let config = flags.load_config().await?;
    print_status("Config file", &flags.config_path().display().to_string());
    print_status("Data dir", &NativePlatform::data_dir().display().to_string());
    println!();
    println!("{}", toml::to_string_pretty(&config.redacted())?);
    Ok(())
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let Some(cmd) = args.get(1) else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "serve" => serve::run_serve(parse_serve_flags(&args, 2)).await,
        "config" => print_config(&parse_serve_flags(&args, 2)).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
