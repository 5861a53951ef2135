pub mod mock;
pub mod transport;

pub use mock::{MockBehavior, MockTransport};
pub use transport::{MinerTransport, Result, TransportError};
