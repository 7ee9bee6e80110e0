mod merger;
mod sampler;
mod subscription;
mod supervisor;

pub use merger::StreamMerger;
pub use sampler::{TelemetrySampler, DEFAULT_SAMPLE_WINDOW};
pub use subscription::{
    ConsoleSubscription, Liveness, NoticeKind, PerformanceSubscription, SessionItem,
    SubscriptionNotice,
};
pub use supervisor::{ConnectionState, ConnectionSupervisor, NORMAL_CLOSE};
