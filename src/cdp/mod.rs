//! Chrome DevTools Protocol backend

pub mod connection;
pub mod driver;
pub mod transport;
pub mod types;

pub use connection::{Connection, Session};
pub use driver::CdpDriver;
pub use transport::Transport;
