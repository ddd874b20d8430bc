use serde_json::Value;

use crate::error::Result;

/// The capability a reply is sent through, without exposing the rest of the
/// worker to the handler. The blocking worker implements this by writing
/// the frame straight to the socket; the resumable worker implements it by
/// enqueueing the frame onto its send backlog, which is drained as the
/// socket becomes writable — so from the handler's point of view `send`
/// never blocks or suspends, only the worker's own I/O does.
pub trait ReplySink {
    fn send(&mut self, value: &Value) -> Result<()>;
}

/// User-supplied application logic, bound to a worker at accept/connect
/// time. The core only ever calls this through the two methods below; it
/// never stores a bare closure with mutable slots (see design notes).
pub trait MessageHandler: Send + Sync {
    /// Called once, before the first message, if the worker exposes a
    /// connection event. Default is a no-op.
    fn on_connect(&self, _reply: &mut dyn ReplySink) -> Result<()> {
        Ok(())
    }

    /// Called for every fully parsed message the worker assembles.
    fn on_message(&self, value: Value, reply: &mut dyn ReplySink) -> Result<()>;
}

/// Replies with exactly the value it received.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn on_message(&self, value: Value, reply: &mut dyn ReplySink) -> Result<()> {
        reply.send(&value)
    }
}
