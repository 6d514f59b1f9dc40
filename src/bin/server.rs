//! Audio Relay Server
//!
//! Captures audio from an input device and streams it to every connected
//! TCP client, advertising itself on the LAN over UDP broadcast.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wifi_audio_link::{
    audio::{list_input_devices, CpalCaptureSource, DeviceSelector},
    codec::EncoderFactory,
    config::ServerConfig,
    network::AudioServer,
};

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
/// Live audio relay server
///
/// Values given on the command line override the config file.
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "WAL_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port for audio streaming
    #[arg(short, long, env = "WAL_PORT")]
    port: Option<u16>,

    /// Address to listen on
    #[arg(long, env = "WAL_BIND")]
    bind: Option<IpAddr>,

    /// Bytes of PCM per frame
    #[arg(long, env = "WAL_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    #[arg(long, env = "WAL_SAMPLE_RATE")]
    sample_rate: Option<u32>,

    /// Channel count for clients that do not request one
    #[arg(long, env = "WAL_CHANNELS")]
    channels: Option<u16>,

    /// Require clients to send this password
    #[arg(long, env = "WAL_PASSWORD")]
    password: Option<String>,

    /// Compress frames with Opus
    #[arg(long, env = "WAL_COMPRESSION")]
    compression: bool,

    /// Input device, by index or name
    #[arg(short, long, env = "WAL_DEVICE")]
    device: Option<DeviceSelector>,

    /// UDP port discovery broadcasts are sent to
    #[arg(long, env = "WAL_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    #[arg(long, env = "WAL_DISCOVERY_INTERVAL_MS")]
    discovery_interval_ms: Option<u64>,

    /// Server name shown to clients
    #[arg(long, env = "WAL_NAME")]
    name: Option<String>,

    /// Do not advertise on the LAN
    #[arg(long, env = "WAL_NO_DISCOVERY")]
    no_discovery: bool,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "WAL_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn load_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ServerConfig::load_or_default().context("Failed to load config")?,
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(channels) = self.channels {
            config.default_channels = channels;
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if self.compression {
            config.compression = true;
        }
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(port) = self.discovery_port {
            config.discovery.port = port;
        }
        if let Some(interval) = self.discovery_interval_ms {
            config.discovery.interval_ms = interval;
        }
        if let Some(name) = &self.name {
            config.discovery.name = name.clone();
        }
        if self.no_discovery {
            config.discovery.enabled = false;
        }

        config.normalize();
        config.validate()?;
        Ok(config)
    }
}

fn print_devices() {
    println!("\n=== Available Input Devices ===");
    for device in list_input_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[cfg(feature = "opus")]
fn encoder_factory(config: &ServerConfig) -> Option<Arc<dyn EncoderFactory>> {
    use wifi_audio_link::codec::OpusEncoderFactory;

    config
        .compression
        .then(|| Arc::new(OpusEncoderFactory::new(config.opus.clone())) as Arc<dyn EncoderFactory>)
}

#[cfg(not(feature = "opus"))]
fn encoder_factory(config: &ServerConfig) -> Option<Arc<dyn EncoderFactory>> {
    if config.compression {
        tracing::warn!("Built without Opus support, streaming raw PCM");
    }
    None
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.list_devices {
        print_devices();
        return Ok(());
    }

    let config = cli.load_config()?;
    tracing::info!("Starting audio relay server");
    tracing::info!(
        "Capture: {} Hz, {} byte chunks, {} default channel(s), compression {}",
        config.sample_rate,
        config.chunk_size,
        config.default_channels,
        if config.compression { "on" } else { "off" }
    );
    if config.password.is_some() {
        tracing::info!("Password protection enabled");
    }

    let source = CpalCaptureSource::new(config.device.clone()).context("Failed to open input device")?;
    let encoders = encoder_factory(&config);

    let server = AudioServer::bind(config, Arc::new(source), encoders)
        .await
        .context("Failed to start server")?;

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
