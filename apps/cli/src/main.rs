use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use ptpip_core::protocol::{DeviceProperty, PropertyForm, PropertyValue, operation_name};
use ptpip_core::{Camera, CameraConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "PTP/IP camera remote tool", long_about = None)]
struct Args {
    /// TOML config file; flags below override it
    #[arg(short, long)]
    config: Option<String>,

    /// Camera address
    #[arg(long)]
    host: Option<String>,

    /// Camera port
    #[arg(long)]
    port: Option<u16>,

    /// Per-command timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Skip the property snapshot after connecting
    #[arg(long)]
    no_prefetch: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print device info and supported operations
    Info,
    /// Read one property descriptor
    Get {
        /// Property code, e.g. 0x5007
        #[arg(value_parser = parse_code)]
        code: u16,
    },
    /// Write an integer property
    Set {
        #[arg(value_parser = parse_code)]
        code: u16,
        /// New value, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_int)]
        value: i128,
    },
    /// Dump every property
    Props,
    /// Log camera events until Ctrl-C or disconnect
    Events,
    /// Write the effective configuration to a file
    SaveConfig { path: String },
}

fn parse_code(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid code '{}': {}", s, e))
}

fn parse_int(s: &str) -> Result<i128, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid value '{}': {}", s, e))
}

fn load_config(args: &Args) -> Result<CameraConfig> {
    let mut config = match &args.config {
        Some(path) => CameraConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path))?,
        None => CameraConfig::default(),
    };
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(timeout) = args.timeout_ms {
        config.command_timeout_ms = timeout;
    }
    if args.no_prefetch {
        config.prefetch_event = false;
    }
    Ok(config)
}

fn print_property(property: &DeviceProperty) {
    println!(
        "0x{:04X}  {:<24} {}{}",
        property.code,
        format!("{:?}", property.current),
        if property.writable { "rw" } else { "ro" },
        if property.enabled { "" } else { " (disabled)" }
    );
    match &property.form {
        PropertyForm::Range { min, max, step } => {
            println!("        range {:?}..={:?} step {:?}", min, max, step);
        }
        PropertyForm::Enumeration { available, .. } if !available.is_empty() => {
            println!("        values {:?}", available);
        }
        _ => {}
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    if let Command::SaveConfig { path } = &args.command {
        config.save_to_file(path)?;
        info!(path = %path, "Config saved");
        return Ok(());
    }

    info!(host = %config.host, port = config.port, "Connecting...");
    let camera = Camera::connect_tcp(&config).await?;

    match args.command {
        Command::Info => {
            let info = camera.device_info();
            println!("{} {} (firmware {})", info.manufacturer, info.model, info.device_version);
            println!("serial: {}", info.serial_number);
            if let Some(ext) = camera.ext_info() {
                println!("SDIO extension version {}", ext.version);
            }
            println!("operations:");
            for op in &info.supported_operations {
                println!("  0x{:04X} {}", op, operation_name(*op));
            }
            println!("properties: {}", info.supported_properties.len());
        }
        Command::Get { code } => {
            let property = camera.get_property(code).await?;
            print_property(&property);
        }
        Command::Set { code, value } => {
            let current = camera.get_property(code).await?;
            let value = PropertyValue::from_integer(current.data_type, value).ok_or_else(|| {
                anyhow!(
                    "value {} does not fit property type 0x{:04X}",
                    value,
                    current.data_type
                )
            })?;
            camera.set_property(code, &value).await?;
            info!(code = %format!("0x{:04X}", code), value = ?value, "Property written");
        }
        Command::Props => {
            let snapshot = camera.fetch_event().await?;
            for property in snapshot.properties.values() {
                print_property(property);
            }
        }
        Command::Events => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
                reason = camera.closed() => {
                    return Err(anyhow!("camera disconnected: {}", reason));
                }
            }
        }
        Command::SaveConfig { .. } => {}
    }

    camera.disconnect().await?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
