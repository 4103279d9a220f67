use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use modem_app::audio::{list_input_devices, list_output_devices};
use modem_app::supervisor::{self, Config, Mode};

#[derive(Parser)]
#[command(about = "Acoustic datagram modem: MFSK over a speaker/microphone pair")]
struct Args {
    #[arg(long, help = "Path of the peer's outbound socket, for announcing ours")]
    tun_outbound: Option<PathBuf>,

    #[arg(long, help = "Path of our socket for forwarding decoded datagrams")]
    tun_inbound: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = CliMode::Both, help = "Which workers to run")]
    mode: CliMode,

    #[arg(long, help = "Playback device name, otherwise audio output is discarded")]
    line_out: Option<String>,

    #[arg(long, help = "Capture device name, otherwise the demodulator hears only silence")]
    line_in: Option<String>,

    #[arg(long, help = "List compatible playback/capture devices and exit")]
    list_devices: bool,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase log verbosity (repeatable)")]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Send,
    Receive,
    Both,
}

impl From<CliMode> for Mode {
    fn from(m: CliMode) -> Self {
        match m {
            CliMode::Send => Mode::Send,
            CliMode::Receive => Mode::Receive,
            CliMode::Both => Mode::Both,
        }
    }
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if args.list_devices {
        println!("playback devices:");
        for name in list_output_devices() {
            println!("  {name}");
        }
        println!("capture devices:");
        for name in list_input_devices() {
            println!("  {name}");
        }
        return;
    }

    let mode: Mode = args.mode.into();
    let tun_outbound = match args.tun_outbound {
        Some(p) => p,
        None if matches!(mode, Mode::Send | Mode::Both) => {
            eprintln!("--tun-outbound is required for this mode");
            std::process::exit(1);
        }
        None => PathBuf::new(),
    };
    let tun_inbound = match args.tun_inbound {
        Some(p) => p,
        None if matches!(mode, Mode::Receive | Mode::Both) => {
            eprintln!("--tun-inbound is required for this mode");
            std::process::exit(1);
        }
        None => PathBuf::new(),
    };

    if matches!(mode, Mode::Send | Mode::Both) && !tun_outbound.exists() {
        eprintln!(
            "--tun-outbound path '{}' does not exist",
            tun_outbound.display()
        );
        std::process::exit(1);
    }
    if matches!(mode, Mode::Receive | Mode::Both) && !tun_inbound.exists() {
        eprintln!(
            "--tun-inbound path '{}' does not exist",
            tun_inbound.display()
        );
        std::process::exit(1);
    }

    let config = Config {
        tun_outbound,
        tun_inbound,
        mode,
        line_out: args.line_out,
        line_in: args.line_in,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_for_signal.store(true, Ordering::Relaxed);
    }) {
        log::error!("failed to install signal handler: {e}");
        std::process::exit(1);
    }

    match supervisor::run(config, shutdown) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("fatal error: {e}");
            std::process::exit(1);
        }
    }
}
