use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use skycam::relay::FRAME_CAPACITY_BULK;
use skycam::{
    BridgeConfig, JpegFileSource, MjpegConfig, OutputMode, OverflowPolicy, RelayConfig,
    RtspConfig, SerialConfig, Server, ServerConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Mjpeg,
    Rtsp,
    Both,
}

impl From<Mode> for OutputMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mjpeg => OutputMode::Mjpeg,
            Mode::Rtsp => OutputMode::Rtsp,
            Mode::Both => OutputMode::Both,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "skycam",
    about = "JPEG camera streamer (MJPEG/RTSP) with a MAVLink telemetry bridge"
)]
struct Args {
    /// Video outputs to run
    #[arg(long, value_enum, default_value = "both")]
    mode: Mode,

    /// MJPEG HTTP bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    http_bind: SocketAddr,

    /// RTSP control bind address
    #[arg(long, default_value = "0.0.0.0:8554")]
    rtsp_bind: SocketAddr,

    /// Maximum concurrent viewers per output
    #[arg(long, default_value_t = 4)]
    max_clients: usize,

    /// Frame rate of the file source and RTP timestamps
    #[arg(long, default_value_t = 10)]
    fps: u32,

    /// Largest frame the relay accepts, in bytes
    #[arg(long, default_value_t = FRAME_CAPACITY_BULK)]
    frame_capacity: usize,

    /// Truncate oversized frames instead of dropping them
    #[arg(long)]
    truncate_oversize: bool,

    /// JPEG files to stream, cycled in order
    #[arg(long, required = true, num_args = 1..)]
    frames: Vec<PathBuf>,

    /// Autopilot serial device; enables the telemetry bridge
    #[arg(long)]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// UDP address ground stations send MAVLink to
    #[arg(long, default_value = "0.0.0.0:14550")]
    mavlink_bind: SocketAddr,

    /// Maximum tracked ground stations
    #[arg(long, default_value_t = 4)]
    max_gcs: usize,

    /// Drop uplink datagrams that are not valid MAVLink frames
    #[arg(long)]
    validate_uplink: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let mut rtsp = RtspConfig {
            bind: self.rtsp_bind,
            max_clients: self.max_clients,
            ..Default::default()
        };
        rtsp.jpeg.fps = self.fps;

        ServerConfig {
            mode: self.mode.into(),
            relay: RelayConfig {
                capacity: self.frame_capacity,
                overflow: if self.truncate_oversize {
                    OverflowPolicy::Truncate
                } else {
                    OverflowPolicy::Reject
                },
            },
            mjpeg: MjpegConfig {
                bind: self.http_bind,
                max_clients: self.max_clients,
                ..Default::default()
            },
            rtsp,
            bridge: BridgeConfig {
                udp_bind: self.mavlink_bind,
                max_peers: self.max_gcs,
                validate_uplink: self.validate_uplink,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let source = match JpegFileSource::from_files(&args.frames, args.fps) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to load frames: {e}");
            return ExitCode::FAILURE;
        }
    };

    let serial = match &args.serial {
        Some(path) => match SerialConfig::new(path).with_baud(args.baud).open() {
            Ok(link) => Some(link),
            Err(e) => {
                eprintln!("Failed to open {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let mut server = Server::new(args.server_config());
    if let Err(e) = server.start(Box::new(source), serial) {
        eprintln!("Failed to start server: {e}");
        return ExitCode::FAILURE;
    }

    if let Some(mjpeg) = server.mjpeg()
        && let Some(addr) = mjpeg.local_addr()
    {
        println!("MJPEG stream on http://{addr}/");
    }
    if let Some(rtsp) = server.rtsp() {
        println!("RTSP stream on {}", rtsp.rtsp_url(&args.rtsp_bind.ip().to_string()));
    }
    if let Some(bridge) = server.bridge() {
        println!("MAVLink bridge on udp://{}", bridge.local_addr());
    }
    println!("Press Enter to stop");

    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "failed to read stdin, stopping");
    }

    server.stop();
    ExitCode::SUCCESS
}
