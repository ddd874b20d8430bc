use std::{net::Ipv4Addr, time::Duration};

/// How the length prefix of a frame is written onto the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderMode {
    /// `header_length` bytes of ASCII decimal digits, right-padded with spaces.
    FixedLength,
    /// ASCII decimal digits followed immediately by `header_terminator`.
    DelimiterTerminated,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{name} must be a valid unsigned integer, got {value:?}")]
    InvalidInteger { name: &'static str, value: String },
    #[error("{name} must not be empty")]
    Empty { name: &'static str },
    #[error("{name} must be one of 'fixed_length' or 'delimiter_terminated', got {value:?}")]
    InvalidHeaderMode { name: &'static str, value: String },
    #[error("{name} must be a valid IPv4 address, got {value:?}")]
    InvalidAddress { name: &'static str, value: String },
}

/// Immutable bag of tunables shared by clients and servers.
///
/// Construct with [`Settings::default`] and the `with_*` builder methods, or
/// load straight from the process environment with [`Settings::from_env`].
/// Once built, share by reference (`Arc<Settings>`) — nothing here is ever
/// mutated after construction.
#[derive(Clone, Debug)]
pub struct Settings {
    header_mode: HeaderMode,
    header_length: usize,
    header_terminator: Vec<u8>,
    /// Only UTF-8 is actually implemented; kept for config-surface parity
    /// with the source this was distilled from, which allowed any Python
    /// codec name.
    encoding: String,
    chunk_size: usize,
    socket_timeout: Duration,
    server_address: Ipv4Addr,
    port: u16,
    thread_pool_size: usize,
    /// Reserved for parity with the original settings surface. Never
    /// serialized onto the wire by any worker in this crate.
    disconnect_message: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_mode: HeaderMode::DelimiterTerminated,
            header_length: 64,
            header_terminator: b"\r\n\r\n".to_vec(),
            encoding: "utf-8".to_string(),
            chunk_size: 4096,
            socket_timeout: Duration::from_secs(5),
            server_address: Ipv4Addr::LOCALHOST,
            port: 5050,
            thread_pool_size: 10,
            disconnect_message: "!DISCONNECT".to_string(),
        }
    }
}

impl Settings {
    pub fn with_header_mode(mut self, mode: HeaderMode) -> Self {
        self.header_mode = mode;
        self
    }

    pub fn with_header_length(mut self, len: usize) -> Self {
        self.header_length = len;
        self
    }

    pub fn with_header_terminator(mut self, terminator: impl Into<Vec<u8>>) -> Self {
        self.header_terminator = terminator.into();
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// `Duration::ZERO` means non-blocking: the blocking worker treats a
    /// zero timeout as "wait forever" (no `set_read_timeout`), matching how
    /// the cooperative workers always run their sockets non-blocking
    /// regardless of this setting.
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_server_address(mut self, addr: Ipv4Addr) -> Self {
        self.server_address = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_thread_pool_size(mut self, size: usize) -> Self {
        self.thread_pool_size = size;
        self
    }

    pub fn header_mode(&self) -> HeaderMode {
        self.header_mode
    }

    pub fn header_length(&self) -> usize {
        self.header_length
    }

    pub fn header_terminator(&self) -> &[u8] {
        &self.header_terminator
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    /// `None` when `socket_timeout` is zero, i.e. "block forever".
    pub fn blocking_read_timeout(&self) -> Option<Duration> {
        if self.socket_timeout.is_zero() { None } else { Some(self.socket_timeout) }
    }

    pub fn server_address(&self) -> Ipv4Addr {
        self.server_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn thread_pool_size(&self) -> usize {
        self.thread_pool_size
    }

    pub fn disconnect_message(&self) -> &str {
        &self.disconnect_message
    }

    /// Loads the table from spec.md §6: `HEADER_LENGTH`, `PORT`, `FORMAT`,
    /// `SERVER_ADDRESS`, `THREADPOOL_SIZE`, `BYTES_CHUNK_SIZE`,
    /// `SOCKET_TIMEOUT`, `BLOCKING_MODE_BOOL`, `HEADER_TYPE`,
    /// `HEADER_TERMINATION_SEQUENCE`. Unset variables fall back to the
    /// same defaults as [`Settings::default`].
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = Settings::default();

        if let Some(v) = env_var("HEADER_LENGTH") {
            settings.header_length = parse_uint("HEADER_LENGTH", &v)?;
        }
        if let Some(v) = env_var("PORT") {
            settings.port = parse_uint("PORT", &v)? as u16;
        }
        if let Some(v) = env_var("FORMAT") {
            settings.encoding = v;
        }
        if let Some(v) = env_var("SERVER_ADDRESS") {
            settings.server_address =
                v.parse().map_err(|_| SettingsError::InvalidAddress {
                    name: "SERVER_ADDRESS",
                    value: v,
                })?;
        }
        if let Some(v) = env_var("THREADPOOL_SIZE") {
            settings.thread_pool_size = parse_uint("THREADPOOL_SIZE", &v)?;
        }
        if let Some(v) = env_var("BYTES_CHUNK_SIZE") {
            settings.chunk_size = parse_uint("BYTES_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = env_var("SOCKET_TIMEOUT") {
            let secs = parse_uint("SOCKET_TIMEOUT", &v)?;
            settings.socket_timeout = Duration::from_secs(secs as u64);
        }
        if let Some(v) = env_var("HEADER_TYPE") {
            settings.header_mode = match v.as_str() {
                "fixed_length" => HeaderMode::FixedLength,
                "delimiter_terminated" => HeaderMode::DelimiterTerminated,
                _ => {
                    return Err(SettingsError::InvalidHeaderMode { name: "HEADER_TYPE", value: v });
                }
            };
        }
        if let Some(v) = env_var("HEADER_TERMINATION_SEQUENCE") {
            if v.is_empty() {
                return Err(SettingsError::Empty { name: "HEADER_TERMINATION_SEQUENCE" });
            }
            settings.header_terminator = v.into_bytes();
        }
        // BLOCKING_MODE_BOOL and MSG_LENGTH_FIXED select which server binary
        // to run / are reserved respectively; they carry no Settings field.

        Ok(settings)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_uint(name: &'static str, value: &str) -> Result<usize, SettingsError> {
    value
        .parse()
        .map_err(|_| SettingsError::InvalidInteger { name, value: value.to_string() })
}
