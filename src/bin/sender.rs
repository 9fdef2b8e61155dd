use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;

use reliable_ftp::channel::SimParams;
use reliable_ftp::sender::{Sender, SenderConfig};

/// Sends a file to a listening receiver over the simulated transport.
#[derive(Debug, Parser)]
#[command(name = "sender")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    local_ip: IpAddr,

    #[arg(long, default_value_t = 0)]
    local_port: u16,

    #[arg(long)]
    remote_ip: IpAddr,

    #[arg(long)]
    remote_port: u16,

    #[arg(long)]
    file: String,

    #[arg(long, default_value_t = 0.0)]
    loss_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    corruption_rate: f64,

    #[arg(long, default_value_t = 0.0)]
    min_delay: f64,

    #[arg(long, default_value_t = 0.0)]
    max_delay: f64,
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env().init();
    let args = Args::parse();

    let file = match File::open(&args.file) {
        Ok(f) => f,
        Err(e) => {
            log::error!("failed to open {}: {e}", args.file);
            return ExitCode::FAILURE;
        }
    };
    let source = BufReader::new(file);

    let sim = SimParams {
        loss_rate: args.loss_rate,
        corruption_rate: args.corruption_rate,
        delay_range: (args.min_delay, args.max_delay),
    };

    let local_addr = SocketAddr::new(args.local_ip, args.local_port);
    let remote_addr = SocketAddr::new(args.remote_ip, args.remote_port);

    let mut sender = match Sender::new(local_addr, sim, source, SenderConfig::default()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to bind local socket: {e}");
            return ExitCode::FAILURE;
        }
    };

    match sender.run(remote_addr) {
        Ok(()) => {
            log::info!("transfer complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("transfer failed: {e}");
            ExitCode::FAILURE
        }
    }
}
