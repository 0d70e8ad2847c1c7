pub mod handshake;
pub mod session;

pub use handshake::{ConnectError, HandshakeOutcome, connect};
pub use session::ClientSession;
