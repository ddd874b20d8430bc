use std::{
    net::Ipv4Addr,
    process::ExitCode,
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use clap::Parser;
use netframe::{EchoHandler, HeaderMode, Settings, cooperative::BusyLoopServer};
use tracing_subscriber::EnvFilter;

/// Busy-loop cooperative echo server: a single FIFO of resumable workers,
/// driven by an accept thread and a background scheduler thread.
#[derive(Parser)]
#[command(name = "netframe-server-busyloop")]
struct Cli {
    #[arg(long, env = "SERVER_ADDRESS", default_value = "127.0.0.1")]
    server_address: Ipv4Addr,

    #[arg(long, env = "PORT", default_value_t = 5050)]
    port: u16,

    #[arg(long, env = "HEADER_TYPE", default_value = "delimiter_terminated")]
    header_type: String,

    #[arg(long, env = "HEADER_LENGTH", default_value_t = 64)]
    header_length: usize,

    #[arg(long, env = "BYTES_CHUNK_SIZE", default_value_t = 4096)]
    bytes_chunk_size: usize,
}

impl Cli {
    fn into_settings(self) -> Settings {
        let header_mode = match self.header_type.as_str() {
            "fixed_length" => HeaderMode::FixedLength,
            _ => HeaderMode::DelimiterTerminated,
        };
        Settings::default()
            .with_server_address(self.server_address)
            .with_port(self.port)
            .with_header_mode(header_mode)
            .with_header_length(self.header_length)
            .with_chunk_size(self.bytes_chunk_size)
            // this server always runs its sockets non-blocking regardless
            // of socket_timeout; 0 keeps blocking_read_timeout() inert.
            .with_socket_timeout(Duration::ZERO)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let settings = Cli::parse().into_settings();

    let server = match BusyLoopServer::bind(settings, Arc::new(EchoHandler)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = AtomicBool::new(false);
    match server.run(&shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server loop ended");
            ExitCode::FAILURE
        }
    }
}
