use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use castlink::{
    DeviceControl, ProcessRunner, WirelessBridge,
    config::{self, Config},
    connection::{self, ConnectionStatus},
    device, server,
};

#[derive(Parser)]
#[command(name = "castlink")]
#[command(about = "Find adb devices and move them from USB to a wireless link for screen casting")]
#[command(version)]
struct Cli {
    /// Path to the adb executable (defaults to the config file, then PATH)
    #[arg(long, global = true, env = "CASTLINK_ADB")]
    adb: Option<PathBuf>,

    /// Log each adb call and bridge step to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached devices
    Devices,

    /// Show the connection state of the primary device
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep polling and print the status whenever it changes
    Watch {
        /// Polling interval in milliseconds (defaults to the config value)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Move the USB-attached device to a wireless adb connection
    Wireless {
        /// Port adb should listen on (defaults to the config value)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Drop the wireless connection and return adb to USB mode
    Disconnect,

    /// Print the serial of the device a mirroring tool should target
    Target,

    /// Start a local HTTP server exposing status and bridge endpoints
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = Config::load()?;
    let adb = DeviceControl::new(
        cli.adb.clone().unwrap_or_else(|| cfg.adb()),
        Arc::new(ProcessRunner::new(cfg.command_timeout())),
    );

    match cli.command {
        Commands::Devices => cmd_devices(&adb),
        Commands::Status { json } => cmd_status(&adb, json),
        Commands::Watch { interval_ms } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| cfg.poll_interval());
            cmd_watch(adb, interval).await
        }
        Commands::Wireless { port } => cmd_wireless(&adb, &cfg, port),
        Commands::Disconnect => cmd_disconnect(&adb),
        Commands::Target => cmd_target(&adb),
        Commands::Serve { port } => cmd_serve(adb, &cfg, port).await,
        Commands::ShowConfig => cmd_show_config(&cfg, &adb),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "castlink=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn cmd_devices(adb: &DeviceControl) -> Result<()> {
    let devices = device::list_devices(adb);

    if devices.is_empty() {
        println!("No devices attached.");
        return Ok(());
    }

    println!("{:<28} {:<10} {}", "SERIAL", "TRANSPORT", "STATE");
    println!("{}", "-".repeat(52));

    for entry in devices.entries() {
        println!(
            "{:<28} {:<10} {}",
            entry.serial,
            entry.transport.side(),
            entry.state.as_str()
        );
    }

    Ok(())
}

fn cmd_status(adb: &DeviceControl, json: bool) -> Result<()> {
    let status = connection::current_status(adb);
    if json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        connection::display_status(&status);
    }

    Ok(())
}

async fn cmd_watch(adb: DeviceControl, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut last: Option<ConnectionStatus> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let probe = adb.clone();
        let status = tokio::task::spawn_blocking(move || connection::current_status(&probe)).await?;
        if last.as_ref() != Some(&status) {
            println!("[{}] {}", status.state.as_str(), status.text);
            last = Some(status);
        }
    }

    Ok(())
}

fn cmd_wireless(adb: &DeviceControl, cfg: &Config, port: Option<u16>) -> Result<()> {
    let mut options = cfg.bridge_options();
    if let Some(port) = port {
        options.port = port;
    }

    println!("Switching to wireless on port {}...", options.port);
    let result = WirelessBridge::new(adb.clone()).bridge(&options);
    if !result.success {
        bail!("{}", result.message);
    }
    println!("{}", result.message);

    Ok(())
}

fn cmd_disconnect(adb: &DeviceControl) -> Result<()> {
    let result = WirelessBridge::new(adb.clone()).disconnect();
    if !result.success {
        bail!("{}", result.message);
    }
    println!("{}", result.message);

    Ok(())
}

fn cmd_target(adb: &DeviceControl) -> Result<()> {
    let devices = device::list_devices(adb);
    match devices.primary() {
        Some(entry) => {
            println!("{}", entry.serial);
            Ok(())
        }
        None => bail!("No device attached"),
    }
}

async fn cmd_serve(adb: DeviceControl, cfg: &Config, port: u16) -> Result<()> {
    let config = server::ServerConfig {
        adb,
        bridge: cfg.bridge_options(),
        port,
    };
    server::run_server(config).await
}

fn cmd_show_config(cfg: &Config, adb: &DeviceControl) -> Result<()> {
    let path = config::config_path()?;
    println!("Config file: {}", path.display());
    let found = if adb.is_available() { "found" } else { "missing" };
    println!("adb:         {} ({})", adb.tool().display(), found);
    println!();
    print!("{}", toml::to_string_pretty(cfg)?);

    Ok(())
}
