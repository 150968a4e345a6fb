//! Command line control of Philips Hue Bluetooth lamps
//!
//! Finds lamps, prints their state and changes power, brightness, color
//! and color temperature.

use std::time::Duration;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use hue_ble_controller::{BtleCentral, Lamp, Rgb};
use tracing_subscriber::EnvFilter;

type Error = Box<dyn std::error::Error>;

#[derive(Parser)]
#[command(name = "hue-ble")]
#[command(about = "Control Philips Hue Bluetooth lamps")]
struct Cli {
    /// Log more (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Lamp address; the first discovered lamp is used when omitted
    #[arg(short, long, env = "HUE_BLE_DEVICE")]
    device: Option<String>,
    /// Scan duration in seconds when looking for a lamp
    #[arg(short, long, env = "HUE_BLE_TIMEOUT", default_value = "5")]
    timeout: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum PowerState {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for Hue lamps
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, env = "HUE_BLE_TIMEOUT", default_value = "5")]
        timeout: u64,
    },
    /// Print the state of a lamp
    Status {
        #[command(flatten)]
        target: Target,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Turn a lamp on or off
    Power {
        #[command(flatten)]
        target: Target,
        state: PowerState,
    },
    /// Set brightness from 0.0 to 1.0 (0 turns the lamp off)
    Brightness {
        #[command(flatten)]
        target: Target,
        level: f64,
    },
    /// Set the color as CIE xy or RGB, components from 0.0 to 1.0
    #[command(group(ArgGroup::new("color").required(true).args(["xy", "rgb"])))]
    Color {
        #[command(flatten)]
        target: Target,
        #[arg(long, num_args = 2, value_names = ["X", "Y"], allow_negative_numbers = true)]
        xy: Option<Vec<f64>>,
        #[arg(long, num_args = 3, value_names = ["R", "G", "B"])]
        rgb: Option<Vec<f64>>,
    },
    /// Set color temperature from 0.0 (coolest) to 1.0 (warmest)
    Temperature {
        #[command(flatten)]
        target: Target,
        level: f64,
    },
}

enum ColorArg {
    Xy(f64, f64),
    Rgb(Rgb),
}

#[derive(serde::Serialize)]
struct Status {
    address: String,
    name: Option<String>,
    model: Option<String>,
    power: Option<bool>,
    brightness: Option<f64>,
    color: Option<(f64, f64)>,
    rgb: Option<(f64, f64, f64)>,
    temperature: f64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let central = BtleCentral::new().await?;

    match cli.command {
        Commands::Scan { timeout } => {
            scan_lamps(&central, timeout).await?;
        }
        Commands::Status { target, json } => {
            let mut lamp = open_lamp(&central, &target).await?;
            let status = read_status(&lamp).await;
            let status = lamp.finish(status).await?;
            print_status(&lamp, &status, json)?;
        }
        Commands::Power { target, state } => {
            let mut lamp = open_lamp(&central, &target).await?;
            let result = lamp.set_power(matches!(state, PowerState::On)).await;
            lamp.finish(result).await?;
        }
        Commands::Brightness { target, level } => {
            let mut lamp = open_lamp(&central, &target).await?;
            let result = lamp.set_brightness(level).await;
            lamp.finish(result).await?;
        }
        Commands::Color { target, xy, rgb } => {
            let color = match (xy.as_deref(), rgb.as_deref()) {
                (Some(&[x, y]), _) => ColorArg::Xy(x, y),
                (_, Some(&[r, g, b])) => ColorArg::Rgb(Rgb::new(r, g, b)),
                _ => return Err("expected --xy X Y or --rgb R G B".into()),
            };
            let mut lamp = open_lamp(&central, &target).await?;
            let result = match color {
                ColorArg::Xy(x, y) => lamp.set_color(x, y).await,
                ColorArg::Rgb(rgb) => lamp.set_color_rgb(rgb).await,
            };
            lamp.finish(result).await?;
        }
        Commands::Temperature { target, level } => {
            let mut lamp = open_lamp(&central, &target).await?;
            let result = lamp.set_temperature(level).await;
            lamp.finish(result).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn scan_lamps(central: &BtleCentral, timeout: u64) -> Result<(), Error> {
    println!("Scanning for Hue lamps ({} seconds)...", timeout);

    let lamps = Lamp::discover(central, Duration::from_secs(timeout)).await?;

    println!("\nFound {} lamps:", lamps.len());
    for lamp in lamps {
        println!("  {}", lamp);
    }
    Ok(())
}

async fn open_lamp(central: &BtleCentral, target: &Target) -> Result<Lamp<BtleCentral>, Error> {
    let mut lamp = match &target.device {
        Some(address) => Lamp::new(central.clone(), address.as_str(), None),
        None => {
            println!("Scanning for Hue lamps...");
            let lamps = Lamp::discover(central, Duration::from_secs(target.timeout)).await?;
            lamps.into_iter().next().ok_or("No Hue lamp found")?
        }
    };

    println!("Connecting to {}...", lamp);
    lamp.connect().await?;
    Ok(lamp)
}

async fn read_status(lamp: &Lamp<BtleCentral>) -> Result<Status, hue_ble_controller::Error> {
    Ok(Status {
        address: lamp.address().to_string(),
        name: lamp.name().map(str::to_string),
        model: lamp.model(),
        power: lamp.get_power(),
        brightness: lamp.get_brightness(),
        color: lamp.get_color(),
        rgb: lamp.get_color_rgb().map(|c| (c.r, c.g, c.b)),
        temperature: lamp.get_temperature().await?,
    })
}

fn print_status(lamp: &Lamp<BtleCentral>, status: &Status, json: bool) -> Result<(), Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
        return Ok(());
    }

    let unknown = || "unknown".to_string();
    println!("Lamp:        {}", lamp);
    println!("Model:       {}", status.model.clone().unwrap_or_else(unknown));
    println!(
        "Power:       {}",
        status.power.map(|on| if on { "on" } else { "off" }.to_string()).unwrap_or_else(unknown)
    );
    println!(
        "Brightness:  {}",
        status.brightness.map(|b| format!("{:.3}", b)).unwrap_or_else(unknown)
    );
    println!(
        "Color (xy):  {}",
        status.color.map(|(x, y)| format!("{:.4}, {:.4}", x, y)).unwrap_or_else(unknown)
    );
    println!(
        "Color (rgb): {}",
        status
            .rgb
            .map(|(r, g, b)| format!("{:.3}, {:.3}, {:.3}", r, g, b))
            .unwrap_or_else(unknown)
    );
    println!("Temperature: {:.3}", status.temperature);
    Ok(())
}
