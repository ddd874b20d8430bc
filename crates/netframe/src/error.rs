use std::io;

/// Error taxonomy for the framing/worker/server stack.
///
/// `SocketIsClosed` is ordinary termination inside the cooperative
/// schedulers (modeled there as a `Done` step outcome, not this variant);
/// it only surfaces as an `Err` on the blocking worker and client paths.
///
/// `OnMessageEffectNotSet` and `CoreHandlerNotSpecified` round out the
/// taxonomy for parity with the source's programming-error cases, but
/// neither is ever constructed here: `MessageHandler::on_message` is a
/// required trait method rather than an optional callback slot, and every
/// server constructor takes its handler as a mandatory argument, so the
/// type system rules both cases out instead of leaving them to a runtime
/// check.
#[derive(Debug, thiserror::Error)]
pub enum NetframeError {
    #[error("payload length {len} exceeds fixed header capacity of {header_length} digits")]
    MessageLengthExceedsHeaderCapacity { len: usize, header_length: usize },

    #[error("run() observed a message but no on_message handler is configured")]
    OnMessageEffectNotSet,

    #[error("server constructed without a handler")]
    CoreHandlerNotSpecified,

    #[error("send/receive called on a client that is not connected")]
    CallingMethodForNonConnectedClient,

    #[error("peer closed the connection")]
    SocketIsClosed,

    #[error("unexpected socket error: {0}")]
    UnexpectedSocketError(#[source] io::Error),

    #[error("connection refused by peer")]
    ConnectError(#[source] io::Error),

    #[error("malformed frame header")]
    MalformedHeader,

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<io::Error> for NetframeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetframeError::ConnectError(err),
            _ => NetframeError::UnexpectedSocketError(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetframeError>;

/// True for the error kinds a non-blocking read/write reports for "try again later".
#[inline]
pub(crate) fn would_block(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock)
}

/// True for the error kinds that should end a blocking worker's `run()` loop
/// cleanly (via `disconnect()`) rather than surface as a fatal error.
#[inline]
pub(crate) fn is_blocking_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
