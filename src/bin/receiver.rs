use std::fs::File;
use std::io::BufWriter;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;

use reliable_ftp::channel::SimParams;
use reliable_ftp::receiver::{Receiver, ReceiverConfig};

/// Listens for a single sender connection and writes the transferred bytes
/// to a file once the connection closes.
#[derive(Debug, Parser)]
#[command(name = "receiver")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    local_ip: IpAddr,

    #[arg(long)]
    local_port: u16,

    #[arg(long)]
    output: String,

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

    let file = match File::create(&args.output) {
        Ok(f) => f,
        Err(e) => {
            log::error!("failed to create {}: {e}", args.output);
            return ExitCode::FAILURE;
        }
    };
    let sink = BufWriter::new(file);

    let sim = SimParams {
        loss_rate: args.loss_rate,
        corruption_rate: args.corruption_rate,
        delay_range: (args.min_delay, args.max_delay),
    };

    let local_addr = SocketAddr::new(args.local_ip, args.local_port);

    let mut receiver = match Receiver::new(local_addr, sim, sink, ReceiverConfig::default()) {
        Ok(r) => r,
        Err(e) => {
            log::error!("failed to bind local socket: {e}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("listening on {local_addr}");

    match receiver.run() {
        Ok(()) => {
            log::info!("connection closed, output written to {}", args.output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("receive failed: {e}");
            ExitCode::FAILURE
        }
    }
}
