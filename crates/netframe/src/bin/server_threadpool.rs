use std::{net::Ipv4Addr, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use netframe::{EchoHandler, HeaderMode, Settings, blocking::ThreadPoolServer};
use tracing_subscriber::EnvFilter;

/// Thread-per-connection echo server: one blocking worker per accepted
/// socket, dispatched onto a fixed-size thread pool.
#[derive(Parser)]
#[command(name = "netframe-server-threadpool")]
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

    #[arg(long, env = "SOCKET_TIMEOUT", default_value_t = 5)]
    socket_timeout: u64,

    #[arg(long, env = "THREADPOOL_SIZE", default_value_t = 10)]
    threadpool_size: usize,
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
            .with_socket_timeout(Duration::from_secs(self.socket_timeout))
            .with_thread_pool_size(self.threadpool_size)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let settings = Cli::parse().into_settings();

    let server = match ThreadPoolServer::bind(settings, Arc::new(EchoHandler)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server loop ended");
            ExitCode::FAILURE
        }
    }
}
