use std::io::{Read, Write};

use serde_json::Value;
use tracing::debug;

use crate::{
    error::{NetframeError, Result, is_blocking_timeout},
    frame,
    handler::{MessageHandler, ReplySink},
    recv_buffer::ReceiveBuffer,
    settings::{HeaderMode, Settings},
};

/// Transports that can stop writes while leaving reads open, i.e. the
/// half-close half of `disconnect()`'s "half-close then close" contract
/// (spec.md §4.3). A real socket's close happens afterward when its owner
/// drops it; mocked transports have no OS-level connection to half-close,
/// so they implement this as a no-op.
pub trait HalfClose {
    fn shutdown_write(&self) -> std::io::Result<()>;
}

impl HalfClose for std::net::TcpStream {
    fn shutdown_write(&self) -> std::io::Result<()> {
        self.shutdown(std::net::Shutdown::Write)
    }
}

/// Per-connection worker that frames messages synchronously on a single
/// blocking transport. Generic over the transport so tests can exercise the
/// frame/receive-buffer machinery deterministically without a real socket;
/// servers and clients instantiate it over `std::net::TcpStream`.
pub struct BlockingWorker<S> {
    stream: S,
    settings: Settings,
    recv_buf: ReceiveBuffer,
}

impl<S: Read + Write + HalfClose> BlockingWorker<S> {
    pub fn new(stream: S, settings: Settings) -> Self {
        Self { stream, settings, recv_buf: ReceiveBuffer::new() }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Serializes `value` as a frame and writes the full frame, looping
    /// until every byte is accepted by the socket. Blocks as the socket
    /// blocks.
    pub fn send(&mut self, value: &Value) -> Result<()> {
        let frame = frame::encode_value(value, &self.settings)?;
        let mut sent = 0;
        while sent < frame.len() {
            sent += self.stream.write(&frame[sent..])?;
        }
        Ok(())
    }

    /// Reads and returns exactly one parsed JSON value. Blocks until a full
    /// frame arrives.
    pub fn receive_one(&mut self) -> Result<Value> {
        let len = self.acquire_header()?;
        let payload = self.read_n(len)?;
        frame::decode_payload(&payload)
    }

    /// Half-closes writes; the socket itself closes when its owner drops
    /// this worker. Errors are swallowed — by the time this is called the
    /// connection is already ending.
    pub fn disconnect(&mut self) {
        debug!("terminating connection");
        let _ = self.stream.flush();
        let _ = self.stream.shutdown_write();
    }

    /// `on_connect()` then `receive_one() -> on_message(value)` until the
    /// socket closes, times out, or a fatal framing error surfaces.
    pub fn run(&mut self, handler: &dyn MessageHandler) -> Result<()> {
        handler.on_connect(self)?;
        loop {
            match self.receive_one() {
                Ok(value) => handler.on_message(value, self)?,
                Err(NetframeError::SocketIsClosed) => {
                    self.disconnect();
                    return Ok(());
                }
                Err(NetframeError::UnexpectedSocketError(ref e)) if is_blocking_timeout(e) => {
                    self.disconnect();
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn acquire_header(&mut self) -> Result<usize> {
        match self.settings.header_mode() {
            HeaderMode::FixedLength => {
                let raw = self.read_n(self.settings.header_length())?;
                frame::parse_fixed_header(&raw)
            }
            HeaderMode::DelimiterTerminated => {
                let mut scratch = Vec::new();
                loop {
                    if let Some(idx) =
                        frame::find_terminator(&scratch, self.settings.header_terminator())
                    {
                        let term_len = self.settings.header_terminator().len();
                        let header_bytes = &scratch[..idx];
                        let rest = scratch[idx + term_len..].to_vec();
                        self.recv_buf.push_front(rest);
                        return frame::parse_length_decimal(header_bytes);
                    }
                    let more = self.read_up_to(self.settings.chunk_size())?;
                    scratch.extend_from_slice(&more);
                }
            }
        }
    }

    /// Preferentially draws from the receive buffer; otherwise does one
    /// blocking socket read of up to `max` bytes. A zero-length socket read
    /// means the peer closed the connection.
    fn read_up_to(&mut self, max: usize) -> Result<Vec<u8>> {
        if !self.recv_buf.is_empty() {
            return Ok(self.recv_buf.take_up_to(max));
        }
        let mut buf = vec![0u8; max];
        let n = self.stream.read(&mut buf).map_err(NetframeError::from)?;
        if n == 0 {
            return Err(NetframeError::SocketIsClosed);
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Collects exactly `n` bytes, pulling from the receive buffer first
    /// and otherwise issuing blocking socket reads sized to what's still
    /// needed.
    fn read_n(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let chunk = self.read_up_to(n - out.len())?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl<S: Read + Write + HalfClose> ReplySink for BlockingWorker<S> {
    fn send(&mut self, value: &Value) -> Result<()> {
        BlockingWorker::send(self, value)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{collections::VecDeque, io};

    use super::HalfClose;

    /// Minimal in-memory transport that can dribble out bytes a few at a
    /// time, for deterministic tests of chunking/split-point behavior.
    pub struct MockStream {
        inbound: VecDeque<u8>,
        feed_size: usize,
        pub written: Vec<u8>,
    }

    impl MockStream {
        pub fn new(inbound: Vec<u8>, feed_size: usize) -> Self {
            Self { inbound: inbound.into(), feed_size: feed_size.max(1), written: Vec::new() }
        }
    }

    impl io::Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Ok(0);
            }
            let n = buf.len().min(self.feed_size).min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl HalfClose for MockStream {
        fn shutdown_write(&self) -> io::Result<()> {
            Ok(())
        }
    }

    impl io::Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
