use std::{
    collections::VecDeque,
    io::{Read, Write},
};

use serde_json::Value;

use crate::{
    error::{NetframeError, Result, would_block},
    frame,
    handler::{MessageHandler, ReplySink},
    settings::{HeaderMode, Settings},
};

/// Which socket operation a suspended step was blocked on. The readiness
/// server uses this to decide which of its two interest sets a socket
/// belongs in after a suspension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// What a single [`ResumableWorker::step`] call accomplished.
#[derive(Debug)]
pub enum StepOutcome {
    /// One full message was parsed and dispatched, or one backlog frame
    /// finished writing. There may be more work ready immediately.
    Progressed,
    /// The socket would block; nothing more can happen until it's ready
    /// again for the given direction.
    Suspended(IoDirection),
    /// The peer closed the connection (or a write hit a dead socket).
    Done,
    /// A fatal, non-recoverable error on this connection.
    Failed(NetframeError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RxPhase {
    Header,
    Payload(usize),
}

/// A single connection's framing state machine, driven one bounded step at
/// a time instead of to completion. Generic over the transport: the busy
/// loop and readiness servers drive it over `mio::net::TcpStream` (always
/// non-blocking); tests drive it over an in-memory mock that reports
/// `WouldBlock` on demand.
///
/// Every send is staged onto `send_backlog` and returns immediately — the
/// socket write itself happens opportunistically inside `step`, so a
/// handler's `send` call can never suspend the step the way the blocking
/// worker's `send` can block its thread.
pub struct ResumableWorker<S> {
    stream: S,
    settings: Settings,
    phase: RxPhase,
    buf: Vec<u8>,
    send_backlog: VecDeque<Vec<u8>>,
    connected: bool,
}

impl<S: Read + Write> ResumableWorker<S> {
    pub fn new(stream: S, settings: Settings) -> Self {
        Self {
            stream,
            settings,
            phase: RxPhase::Header,
            buf: Vec::new(),
            send_backlog: VecDeque::new(),
            connected: false,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether this connection currently has anything queued to write.
    /// The readiness server uses this to decide which half of the
    /// read/write interest split a socket belongs in.
    pub fn wants_write(&self) -> bool {
        !self.send_backlog.is_empty()
    }

    pub(crate) fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Advances the connection by exactly one bounded unit of work: either
    /// one on_connect dispatch, one backlog frame, or one parsed message.
    /// Never blocks.
    pub fn step(&mut self, handler: &dyn MessageHandler) -> StepOutcome {
        if !self.connected {
            self.connected = true;
            if let Err(e) = handler.on_connect(self) {
                return StepOutcome::Failed(e);
            }
            return StepOutcome::Progressed;
        }
        if self.wants_write() { self.drain_backlog() } else { self.read_step(handler) }
    }

    fn drain_backlog(&mut self) -> StepOutcome {
        let Some(front) = self.send_backlog.front_mut() else {
            return StepOutcome::Progressed;
        };
        match self.stream.write(front) {
            Ok(0) => StepOutcome::Done,
            Ok(n) if n == front.len() => {
                self.send_backlog.pop_front();
                StepOutcome::Progressed
            }
            Ok(n) => {
                front.drain(..n);
                StepOutcome::Suspended(IoDirection::Write)
            }
            Err(e) if would_block(&e) => StepOutcome::Suspended(IoDirection::Write),
            Err(e) => StepOutcome::Failed(e.into()),
        }
    }

    fn read_step(&mut self, handler: &dyn MessageHandler) -> StepOutcome {
        loop {
            match self.try_extract_frame() {
                Ok(Some(payload)) => {
                    let value = match frame::decode_payload(&payload) {
                        Ok(v) => v,
                        Err(e) => return StepOutcome::Failed(e),
                    };
                    return match handler.on_message(value, self) {
                        Ok(()) => StepOutcome::Progressed,
                        Err(e) => StepOutcome::Failed(e),
                    };
                }
                Ok(None) => {}
                Err(e) => return StepOutcome::Failed(e),
            }

            let mut chunk = vec![0u8; self.settings.chunk_size()];
            match self.stream.read(&mut chunk) {
                Ok(0) => return StepOutcome::Done,
                Ok(n) => {
                    chunk.truncate(n);
                    self.buf.extend_from_slice(&chunk);
                }
                Err(e) if would_block(&e) => return StepOutcome::Suspended(IoDirection::Read),
                Err(e) => return StepOutcome::Failed(e.into()),
            }
        }
    }

    /// Pulls exactly one complete frame out of `self.buf` if present,
    /// without touching the socket. `Ok(None)` means more bytes are needed.
    fn try_extract_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.phase {
                RxPhase::Header => match self.settings.header_mode() {
                    HeaderMode::FixedLength => {
                        let hl = self.settings.header_length();
                        if self.buf.len() < hl {
                            return Ok(None);
                        }
                        let header: Vec<u8> = self.buf.drain(..hl).collect();
                        let len = frame::parse_fixed_header(&header)?;
                        self.phase = RxPhase::Payload(len);
                    }
                    HeaderMode::DelimiterTerminated => {
                        let term = self.settings.header_terminator();
                        match frame::find_terminator(&self.buf, term) {
                            None => return Ok(None),
                            Some(idx) => {
                                let header: Vec<u8> = self.buf.drain(..idx).collect();
                                self.buf.drain(..term.len());
                                let len = frame::parse_length_decimal(&header)?;
                                self.phase = RxPhase::Payload(len);
                            }
                        }
                    }
                },
                RxPhase::Payload(len) => {
                    if self.buf.len() < len {
                        return Ok(None);
                    }
                    let payload: Vec<u8> = self.buf.drain(..len).collect();
                    self.phase = RxPhase::Header;
                    return Ok(Some(payload));
                }
            }
        }
    }
}

impl<S: Read + Write> ReplySink for ResumableWorker<S> {
    fn send(&mut self, value: &Value) -> Result<()> {
        let frame = frame::encode_value(value, &self.settings)?;
        self.send_backlog.push_back(frame);
        Ok(())
    }
}
