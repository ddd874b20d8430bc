use std::{net::Ipv4Addr, process::ExitCode, time::Duration};

use clap::Parser;
use netframe::{HeaderMode, Settings, blocking::BlockingClient};
use tracing_subscriber::EnvFilter;

/// Minimal client: sends one JSON value and prints whatever comes back.
#[derive(Parser)]
#[command(name = "netframe-client")]
struct Cli {
    #[arg(long, env = "SERVER_ADDRESS", default_value = "127.0.0.1")]
    server_address: Ipv4Addr,

    #[arg(long, env = "PORT", default_value_t = 5050)]
    port: u16,

    #[arg(long, env = "HEADER_TYPE", default_value = "delimiter_terminated")]
    header_type: String,

    #[arg(long, env = "HEADER_LENGTH", default_value_t = 64)]
    header_length: usize,

    #[arg(long, env = "SOCKET_TIMEOUT", default_value_t = 5)]
    socket_timeout: u64,

    /// JSON value to send, e.g. '"hello"' or '{"x":1}'.
    #[arg(default_value = "\"whatever\"")]
    message: String,
}

impl Cli {
    fn settings(&self) -> Settings {
        let header_mode = match self.header_type.as_str() {
            "fixed_length" => HeaderMode::FixedLength,
            _ => HeaderMode::DelimiterTerminated,
        };
        Settings::default()
            .with_server_address(self.server_address)
            .with_port(self.port)
            .with_header_mode(header_mode)
            .with_header_length(self.header_length)
            .with_socket_timeout(Duration::from_secs(self.socket_timeout))
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let value: serde_json::Value = match serde_json::from_str(&cli.message) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "message is not valid JSON");
            return ExitCode::FAILURE;
        }
    };

    let mut client = match BlockingClient::connect(cli.settings()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = client.send(&value) {
        tracing::error!(error = %e, "send failed");
        return ExitCode::FAILURE;
    }

    match client.receive() {
        Ok(reply) => {
            println!("{reply}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "receive failed");
            ExitCode::FAILURE
        }
    }
}
