mod event;
mod filter;
mod ring;
mod sample;

pub use event::{
    EventEnvelope, InstanceOutput, MalformedMessage, SnowflakeId, StreamEvent,
    CONSOLE_EVENT_CATEGORY, CONSOLE_OUTPUT_KIND,
};
pub use filter::{classify, Classification, DisplayFilter, MessageKind, PlayerChat};
pub use ring::RingBuffer;
pub use sample::{Metric, PerformanceSample};
