pub mod connection_limit;

pub use connection_limit::{ClientIp, ConnectionSlot, connection_limit_middleware};
