//! Subscriptions
//!
//! A subscription binds the connection supervisor, the event log and (for
//! the performance stream) the sample window to one target instance. It is
//! created when observation starts and torn down when the caller stops or
//! switches targets; switching targets always means a new subscription.
//!
//! After `teardown()` nothing is mutated any more. A backfill request that is
//! still in flight is not cancelled, but its result is dropped by checking
//! the shared `Liveness` flag before it is applied.

use crate::data::{DisplayFilter, EventEnvelope, PerformanceSample, StreamEvent};
use crate::net::backfill::BackfillError;
use crate::net::channel::ChannelEvent;
use crate::stream::{ConnectionState, ConnectionSupervisor, StreamMerger, TelemetrySampler};

use crossbeam::channel;
use tracing::{debug, warn};
use uuid::Uuid;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Something that changed in a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionItem {
    State(ConnectionState),
    /// Number of newly retained console events.
    Events(usize),
    Sample(PerformanceSample),
    Notice(NoticeKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    /// The history request failed. Live data is unaffected.
    BackfillFailed(String),
    /// A live message could not be decoded and was dropped.
    MalformedMessage(String),
}

/// Delivered on the optional side channel given to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionNotice {
    pub target: Uuid,
    pub kind: NoticeKind,
}

/// Shared flag telling outstanding work whether its subscription is gone.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn is_superseded(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn supersede(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Fields common to both stream kinds.
#[derive(Debug)]
struct Core {
    target: Uuid,
    supervisor: ConnectionSupervisor,
    liveness: Liveness,
    malformed: u64,
    notices: Option<channel::Sender<SubscriptionNotice>>,
}

impl Core {
    fn new(target: Uuid, supervisor: ConnectionSupervisor) -> Core {
        Core {
            target,
            supervisor,
            liveness: Liveness::default(),
            malformed: 0,
            notices: None,
        }
    }

    /// False once torn down or when permission was missing; nothing may be
    /// mutated in either case.
    fn accepts_input(&self) -> bool {
        !self.liveness.is_superseded() && self.supervisor.state() != ConnectionState::NoPermission
    }

    fn notify(&self, kind: NoticeKind) -> SessionItem {
        if let Some(tx) = &self.notices {
            // Side channel is best effort; drop if the receiver is full or gone.
            let _ = tx.try_send(SubscriptionNotice {
                target: self.target,
                kind: kind.clone(),
            });
        }
        SessionItem::Notice(kind)
    }

    fn lifecycle(&mut self, event: &ChannelEvent) -> Option<ConnectionState> {
        match event {
            ChannelEvent::Opened => self.supervisor.channel_opened(),
            ChannelEvent::Closed(code) => self.supervisor.channel_closed(*code),
            ChannelEvent::Failed(reason) => {
                debug!("{}: channel failed: {}", self.target, reason);
                self.supervisor.channel_failed()
            }
            ChannelEvent::Message(_) => None,
        }
    }

    fn malformed(&mut self, err: impl std::fmt::Display) -> SessionItem {
        self.malformed += 1;
        warn!("{}: dropping malformed message: {}", self.target, err);
        self.notify(NoticeKind::MalformedMessage(err.to_string()))
    }
}

#[derive(Debug)]
pub struct ConsoleSubscription {
    core: Core,
    merger: StreamMerger,
    filter: DisplayFilter,
}

impl ConsoleSubscription {
    pub fn new(target: Uuid, has_permission: bool) -> ConsoleSubscription {
        ConsoleSubscription {
            core: Core::new(target, ConnectionSupervisor::new(has_permission)),
            merger: StreamMerger::new(),
            filter: DisplayFilter::default(),
        }
    }

    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.merger = StreamMerger::with_history_limit(limit);
        self
    }

    pub fn with_filter(mut self, filter: DisplayFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_notices(mut self, tx: channel::Sender<SubscriptionNotice>) -> Self {
        self.core.notices = Some(tx);
        self
    }

    pub fn target(&self) -> Uuid {
        self.core.target
    }

    pub fn state(&self) -> ConnectionState {
        self.core.supervisor.state()
    }

    pub fn liveness(&self) -> Liveness {
        self.core.liveness.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.core.liveness.is_superseded()
    }

    pub fn malformed_count(&self) -> u64 {
        self.core.malformed
    }

    pub fn filter(&self) -> &DisplayFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut DisplayFilter {
        &mut self.filter
    }

    pub fn log(&self) -> &StreamMerger {
        &self.merger
    }

    pub fn events(&self) -> impl DoubleEndedIterator<Item = &StreamEvent> + '_ {
        self.merger.events()
    }

    pub fn visible(&self) -> impl DoubleEndedIterator<Item = &StreamEvent> + '_ {
        self.merger.visible(&self.filter)
    }

    pub fn handle_channel(&mut self, event: ChannelEvent) -> Vec<SessionItem> {
        if !self.core.accepts_input() {
            return Vec::new();
        }
        if let ChannelEvent::Message(text) = &event {
            return match EventEnvelope::parse(text) {
                Ok(envelope) => match self.merger.merge(std::iter::once(envelope)) {
                    0 => Vec::new(),
                    n => vec![SessionItem::Events(n)],
                },
                Err(err) => vec![self.core.malformed(err)],
            };
        }
        self.core
            .lifecycle(&event)
            .map(SessionItem::State)
            .into_iter()
            .collect()
    }

    /// Applies the backfill result. A failure is reported but leaves the
    /// connection state to the channel lifecycle.
    pub fn apply_backfill(
        &mut self,
        result: Result<Vec<EventEnvelope>, BackfillError>,
    ) -> Vec<SessionItem> {
        if !self.core.accepts_input() {
            debug!("{}: discarding backfill for inactive subscription", self.core.target);
            return Vec::new();
        }
        match result {
            Ok(batch) => {
                let mut items = Vec::new();
                let added = self.merger.merge(batch);
                if added > 0 {
                    items.push(SessionItem::Events(added));
                }
                if let Some(state) = self.core.supervisor.backfill_completed() {
                    items.push(SessionItem::State(state));
                }
                items
            }
            Err(err) => {
                warn!("{}: backfill failed: {}", self.core.target, err);
                vec![self.core.notify(NoticeKind::BackfillFailed(err.to_string()))]
            }
        }
    }

    /// Stops all further mutation and flags any in-flight backfill as stale.
    /// Closing the channel itself is up to whoever owns it.
    pub fn teardown(&mut self) {
        self.core.liveness.supersede();
        self.merger.clear();
    }
}

#[derive(Debug)]
pub struct PerformanceSubscription {
    core: Core,
    sampler: TelemetrySampler,
}

impl PerformanceSubscription {
    pub fn new(target: Uuid, has_permission: bool, capacity: usize) -> PerformanceSubscription {
        PerformanceSubscription {
            core: Core::new(target, ConnectionSupervisor::without_backfill(has_permission)),
            sampler: TelemetrySampler::new(capacity),
        }
    }

    pub fn with_notices(mut self, tx: channel::Sender<SubscriptionNotice>) -> Self {
        self.core.notices = Some(tx);
        self
    }

    pub fn target(&self) -> Uuid {
        self.core.target
    }

    pub fn state(&self) -> ConnectionState {
        self.core.supervisor.state()
    }

    pub fn is_torn_down(&self) -> bool {
        self.core.liveness.is_superseded()
    }

    pub fn malformed_count(&self) -> u64 {
        self.core.malformed
    }

    pub fn sampler(&self) -> &TelemetrySampler {
        &self.sampler
    }

    pub fn handle_channel(&mut self, event: ChannelEvent) -> Vec<SessionItem> {
        if !self.core.accepts_input() {
            return Vec::new();
        }
        if let ChannelEvent::Message(text) = &event {
            return match PerformanceSample::parse(text) {
                Ok(sample) => {
                    self.sampler.push(sample);
                    vec![SessionItem::Sample(sample)]
                }
                Err(err) => vec![self.core.malformed(err)],
            };
        }
        self.core
            .lifecycle(&event)
            .map(SessionItem::State)
            .into_iter()
            .collect()
    }

    /// Stops all further mutation and releases the sample window.
    pub fn teardown(&mut self) {
        self.core.liveness.supersede();
        self.sampler = TelemetrySampler::new(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::NORMAL_CLOSE;
    use ConnectionState::*;

    const TARGET: &str = "3f2b1c9e-8d4a-4b6f-9e1a-2c3d4e5f6a7b";

    fn target() -> Uuid {
        Uuid::parse_str(TARGET).unwrap()
    }

    fn line(id: u64, message: &str) -> String {
        serde_json::json!({
            "id": id.to_string(),
            "detail": "",
            "category": "InstanceEvent",
            "inner": {
                "targetId": TARGET,
                "targetName": "survival",
                "kind": "InstanceOutput",
                "message": message,
            }
        })
        .to_string()
    }

    fn batch(ids: &[u64]) -> Vec<EventEnvelope> {
        ids.iter()
            .map(|id| EventEnvelope::parse(&line(*id, "history")).unwrap())
            .collect()
    }

    fn ids(sub: &ConsoleSubscription) -> Vec<u64> {
        sub.events().map(|e| e.id.0).collect()
    }

    #[test]
    fn live_before_backfill_end_to_end() {
        let mut sub = ConsoleSubscription::new(target(), true);
        assert_eq!(sub.state(), Loading);

        assert_eq!(
            sub.handle_channel(ChannelEvent::Opened),
            vec![SessionItem::State(LiveNoBuffer)]
        );
        assert_eq!(
            sub.handle_channel(ChannelEvent::Message(line(102, "live"))),
            vec![SessionItem::Events(1)]
        );
        assert_eq!(
            sub.apply_backfill(Ok(batch(&[100, 101]))),
            vec![SessionItem::Events(2), SessionItem::State(Live)]
        );
        assert_eq!(ids(&sub), vec![100, 101, 102]);
    }

    #[test]
    fn backfill_before_channel() {
        let mut sub = ConsoleSubscription::new(target(), true);
        sub.apply_backfill(Ok(batch(&[1, 2])));
        assert_eq!(sub.state(), Buffered);
        sub.handle_channel(ChannelEvent::Opened);
        assert_eq!(sub.state(), Live);
        sub.handle_channel(ChannelEvent::Message(line(2, "dup")));
        sub.handle_channel(ChannelEvent::Message(line(3, "new")));
        assert_eq!(ids(&sub), vec![1, 2, 3]);
    }

    #[test]
    fn empty_backfill_still_completes() {
        let mut sub = ConsoleSubscription::new(target(), true);
        assert_eq!(
            sub.apply_backfill(Ok(Vec::new())),
            vec![SessionItem::State(Buffered)]
        );
    }

    #[test]
    fn failed_backfill_leaves_live_no_buffer() {
        let (tx, rx) = channel::bounded(4);
        let mut sub = ConsoleSubscription::new(target(), true).with_notices(tx);
        sub.handle_channel(ChannelEvent::Opened);
        let items = sub.apply_backfill(Err(BackfillError::Status(500)));
        assert!(matches!(
            items.as_slice(),
            [SessionItem::Notice(NoticeKind::BackfillFailed(_))]
        ));
        assert_eq!(sub.state(), LiveNoBuffer);

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.target, target());
        assert!(matches!(notice.kind, NoticeKind::BackfillFailed(_)));
    }

    #[test]
    fn no_permission_is_final() {
        let mut sub = ConsoleSubscription::new(target(), false);
        assert!(sub.handle_channel(ChannelEvent::Opened).is_empty());
        assert!(sub
            .handle_channel(ChannelEvent::Message(line(1, "x")))
            .is_empty());
        assert!(sub.apply_backfill(Ok(batch(&[1]))).is_empty());
        sub.handle_channel(ChannelEvent::Closed(NORMAL_CLOSE));
        assert_eq!(sub.state(), NoPermission);
        assert_eq!(sub.log().len(), 0);
    }

    #[test]
    fn close_codes() {
        let mut graceful = ConsoleSubscription::new(target(), true);
        graceful.handle_channel(ChannelEvent::Opened);
        graceful.handle_channel(ChannelEvent::Closed(NORMAL_CLOSE));
        assert_eq!(graceful.state(), Closed);

        let mut abnormal = ConsoleSubscription::new(target(), true);
        abnormal.handle_channel(ChannelEvent::Closed(1006));
        assert_eq!(abnormal.state(), Error);

        let mut failed = ConsoleSubscription::new(target(), true);
        failed.handle_channel(ChannelEvent::Failed("reset".into()));
        assert_eq!(failed.state(), Error);
    }

    #[test]
    fn malformed_messages_are_dropped_and_counted() {
        let mut sub = ConsoleSubscription::new(target(), true);
        sub.handle_channel(ChannelEvent::Opened);
        let items = sub.handle_channel(ChannelEvent::Message("{oops".into()));
        assert!(matches!(
            items.as_slice(),
            [SessionItem::Notice(NoticeKind::MalformedMessage(_))]
        ));
        assert_eq!(sub.malformed_count(), 1);
        assert_eq!(sub.state(), LiveNoBuffer);
        sub.handle_channel(ChannelEvent::Message(line(7, "ok")));
        assert_eq!(ids(&sub), vec![7]);
    }

    #[test]
    fn teardown_discards_late_backfill() {
        let mut sub = ConsoleSubscription::new(target(), true);
        let liveness = sub.liveness();
        sub.handle_channel(ChannelEvent::Opened);
        sub.teardown();
        assert!(liveness.is_superseded());
        assert!(sub.apply_backfill(Ok(batch(&[1, 2]))).is_empty());
        assert!(sub
            .handle_channel(ChannelEvent::Message(line(3, "late")))
            .is_empty());
        assert_eq!(sub.log().len(), 0);
        assert_eq!(sub.state(), LiveNoBuffer);
    }

    #[test]
    fn performance_samples_fill_the_window() {
        let mut sub = PerformanceSubscription::new(target(), true, 60);
        assert_eq!(
            sub.handle_channel(ChannelEvent::Opened),
            vec![SessionItem::State(Live)]
        );
        for i in 1..=61 {
            let msg = format!(r#"{{"cpuUsagePercent":{i},"memoryUsageBytes":null}}"#);
            sub.handle_channel(ChannelEvent::Message(msg));
        }
        let ring = sub.sampler().samples();
        assert_eq!(ring.len(), 60);
        assert_eq!(ring[0].cpu_usage_percent, Some(2.0));
        assert_eq!(ring[59].cpu_usage_percent, Some(61.0));
    }

    #[test]
    fn performance_without_permission_stays_empty() {
        let mut sub = PerformanceSubscription::new(target(), false, 60);
        sub.handle_channel(ChannelEvent::Opened);
        sub.handle_channel(ChannelEvent::Message(r#"{"cpuUsagePercent":5}"#.into()));
        assert_eq!(sub.state(), NoPermission);
        assert_eq!(sub.sampler().received(), 0);
    }

    #[test]
    fn performance_teardown_releases_the_window() {
        let mut sub = PerformanceSubscription::new(target(), true, 60);
        sub.handle_channel(ChannelEvent::Opened);
        sub.handle_channel(ChannelEvent::Message(r#"{"cpuUsagePercent":5}"#.into()));
        sub.teardown();
        assert!(sub.is_torn_down());
        assert_eq!(sub.sampler().received(), 0);
        assert!(sub
            .handle_channel(ChannelEvent::Message(r#"{"cpuUsagePercent":6}"#.into()))
            .is_empty());
        assert!(sub.handle_channel(ChannelEvent::Closed(NORMAL_CLOSE)).is_empty());
        assert_eq!(sub.state(), Live);
    }
}
