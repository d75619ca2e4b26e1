//! usb-link
//!
//! Bridges a USB peripheral with one interrupt IN/OUT endpoint pair to the
//! terminal: inbound reports are printed as hex lines, hex lines typed on
//! stdin are written to the device.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use common::setup_logging;
use host::config::{LinkConfig, parse_usb_id};
use host::usb::{Platform, RusbPlatform};
use host::{LinkState, UsbLink};
use protocol::{DeviceDescriptor, UsbEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-link")]
#[command(
    author,
    version,
    about = "USB link - hex terminal for interrupt IN/OUT peripherals"
)]
#[command(long_about = "
Connects to a USB peripheral exposing a single interface with one interrupt
IN and one interrupt OUT endpoint. Every report read from the device is printed
as an upper-case hex line; every hex line read from stdin is written to the
device.

EXAMPLES:
    # List attached devices and their endpoint layout
    usb-link --list-devices

    # Connect to a device
    usb-link --vid 0x04D8 --pid 0x00DF

    # Run with debug logging
    usb-link --vid 04d8 --pid 00df --log-level debug

CONFIGURATION:
    The link looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-link/link.toml
    3. /etc/usb-link/link.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Vendor ID (hex, or decimal with a # prefix)
    #[arg(long, value_name = "ID", value_parser = parse_usb_id)]
    vid: Option<u16>,

    /// Product ID (hex, or decimal with a # prefix)
    #[arg(long, value_name = "ID", value_parser = parse_usb_id)]
    pid: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = LinkConfig::default();
        let path = LinkConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        LinkConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        LinkConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.link.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-link v{}", env!("CARGO_PKG_VERSION"));

    let platform =
        RusbPlatform::new(config.write_timeout()).context("Failed to initialize libusb")?;

    if args.list_devices {
        return list_devices_mode(&platform);
    }

    let (vendor_id, product_id) = match (args.vid, args.pid) {
        (Some(vid), Some(pid)) => (vid, pid),
        (None, None) => config.target().ok_or_else(|| {
            anyhow!("No device selected: pass --vid/--pid or set link.vendor_id/product_id")
        })?,
        _ => bail!("--vid and --pid must be given together"),
    };

    let link = UsbLink::new(platform, &config);
    link.connect(vendor_id, product_id)
        .await
        .map_err(|e| anyhow!("[{}] {}", e.code(), e))?;
    info!("Connected to {:04x}:{:04x}", vendor_id, product_id);

    let result = run_terminal(&link).await;

    if link.state() == LinkState::Open {
        if let Err(e) = link.manager().disconnect_async().await {
            error!("[{}] {}", e.code(), e);
        }
    }

    result
}

/// Pump events to stdout and stdin lines to the device until EOF or Ctrl-C
async fn run_terminal(link: &UsbLink<RusbPlatform>) -> Result<()> {
    let events = link.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                return Ok(());
            }
            event = events.recv() => {
                match event.context("Event channel closed")? {
                    UsbEvent::Data { payload } => println!("{}", payload),
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("stdin closed, disconnecting");
                    return Ok(());
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = link.manager().write(line).await {
                    error!("[{}] {}", e.code(), e);
                }
            }
        }
    }
}

fn list_devices_mode(platform: &RusbPlatform) -> Result<()> {
    let devices = platform.devices().context("Failed to enumerate devices")?;

    if devices.is_empty() {
        println!("No USB devices found");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in &devices {
        print_device(device);
    }

    Ok(())
}

fn print_device(device: &DeviceDescriptor) {
    let supported = if host::usb::validate(device).is_ok() {
        " [supported]"
    } else {
        ""
    };
    println!("  {}{}", device, supported);

    for interface in &device.interfaces {
        println!("    interface {}", interface.number);
        for endpoint in &interface.endpoints {
            println!(
                "      ep {:#04x} {:?} {:?} max {} bytes",
                endpoint.address, endpoint.kind, endpoint.direction, endpoint.max_packet_size
            );
        }
    }
}
