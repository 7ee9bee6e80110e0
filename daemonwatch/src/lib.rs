pub mod config;
pub mod data;
pub mod net;
pub mod stream;

pub use config::Config;
pub use net::session::{ConsoleSession, PerformanceSession};
pub use stream::{ConnectionState, SessionItem};
