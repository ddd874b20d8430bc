use std::net::TcpStream;

use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::{NetframeError, Result},
    settings::Settings,
};

use super::worker::BlockingWorker;

/// A single blocking client connection, closed automatically on drop.
///
/// Mirrors the `with ... as client:` context-manager pattern this crate's
/// client model was distilled from: the socket is torn down the moment the
/// guard goes out of scope, whether that's an early return, a panic
/// unwinding through it, or the ordinary end of a block.
pub struct BlockingClient {
    worker: Option<BlockingWorker<TcpStream>>,
    settings: Settings,
}

impl BlockingClient {
    /// Connects to `settings.server_address():settings.port()` and applies
    /// `settings.blocking_read_timeout()` to the new socket.
    pub fn connect(settings: Settings) -> Result<Self> {
        let addr = (settings.server_address(), settings.port());
        info!(?addr, "connecting");
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(settings.blocking_read_timeout())?;
        stream.set_nodelay(true)?;
        Ok(Self { worker: Some(BlockingWorker::new(stream, settings.clone())), settings })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn send(&mut self, value: &Value) -> Result<()> {
        self.worker_mut()?.send(value)
    }

    pub fn receive(&mut self) -> Result<Value> {
        self.worker_mut()?.receive_one()
    }

    /// Closes the connection. Idempotent; also runs automatically on drop.
    pub fn disconnect(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.disconnect();
        }
    }

    fn worker_mut(&mut self) -> Result<&mut BlockingWorker<TcpStream>> {
        self.worker.as_mut().ok_or(NetframeError::CallingMethodForNonConnectedClient)
    }
}

impl Drop for BlockingClient {
    fn drop(&mut self) {
        if self.worker.is_some() {
            debug!("client dropped while still connected, disconnecting");
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    use serde_json::json;

    use super::*;
    use crate::frame;

    #[test]
    fn connect_errors_cleanly_when_nothing_is_listening() {
        let settings = Settings::default().with_port(1);
        let err = BlockingClient::connect(settings).unwrap_err();
        assert!(matches!(err, NetframeError::ConnectError(_) | NetframeError::UnexpectedSocketError(_)));
    }

    #[test]
    fn send_then_receive_round_trips_through_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let settings = Settings::default().with_port(port);

        let server_settings = settings.clone();
        let handle = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let frame = frame::encode_value(&json!("ping"), &server_settings).unwrap();
            let mut buf = vec![0u8; frame.len()];
            sock.read_exact(&mut buf).unwrap();
            assert_eq!(buf, frame);
            let reply = frame::encode_value(&json!("pong"), &server_settings).unwrap();
            sock.write_all(&reply).unwrap();
        });

        let mut client = BlockingClient::connect(settings).unwrap();
        client.send(&json!("ping")).unwrap();
        assert_eq!(client.receive().unwrap(), json!("pong"));
        handle.join().unwrap();
    }

    #[test]
    fn methods_after_disconnect_report_not_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let settings = Settings::default().with_port(port);
        let handle = thread::spawn(move || listener.accept().unwrap());
        let mut client = BlockingClient::connect(settings).unwrap();
        client.disconnect();
        let err = client.send(&json!("x")).unwrap_err();
        assert!(matches!(err, NetframeError::CallingMethodForNonConnectedClient));
        handle.join().unwrap();
    }
}
