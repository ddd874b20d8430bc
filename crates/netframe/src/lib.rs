pub mod blocking;
pub mod cooperative;
mod error;
mod frame;
mod handler;
mod recv_buffer;
mod settings;

pub use error::{NetframeError, Result};
pub use frame::{decode_payload, encode_frame, encode_value};
pub use handler::{EchoHandler, MessageHandler, ReplySink};
pub use recv_buffer::ReceiveBuffer;
pub use settings::{HeaderMode, Settings, SettingsError};
