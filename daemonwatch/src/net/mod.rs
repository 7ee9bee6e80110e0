pub mod backfill;
pub mod channel;
pub mod command;
mod endpoint;
pub mod session;

pub use backfill::{BackfillError, BackfillFetcher};
pub use channel::{ChannelEvent, PushChannel};
pub use command::{CommandError, CommandSender};
pub use endpoint::{Endpoint, EndpointError};
