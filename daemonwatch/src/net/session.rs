//! Sessions
//!
//! A session drives one subscription: it starts the backfill request and the
//! push channel side by side and feeds whatever completes first into the
//! subscription, one event at a time, on the caller's task. Callers pull
//! `SessionItem`s with `next_item()` and can `select!` on it together with
//! timers or input.

use super::backfill::{BackfillError, BackfillFetcher};
use super::channel::{ChannelEvent, PushChannel};
use super::endpoint::EndpointError;
use crate::config::Config;
use crate::data::EventEnvelope;
use crate::stream::{ConsoleSubscription, PerformanceSubscription, SessionItem};

use tokio::sync::oneshot;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use std::collections::VecDeque;
use std::time::Duration;

type BackfillResult = Result<Vec<EventEnvelope>, BackfillError>;

async fn recv_backfill(
    rx: &mut Option<oneshot::Receiver<BackfillResult>>,
) -> Result<BackfillResult, oneshot::error::RecvError> {
    match rx {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

async fn next_channel_event(channel: &mut Option<PushChannel>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

pub struct ConsoleSession {
    subscription: ConsoleSubscription,
    channel: Option<PushChannel>,
    backfill: Option<oneshot::Receiver<BackfillResult>>,
    pending: VecDeque<SessionItem>,
}

impl ConsoleSession {
    /// Opens the console stream of `target` as described by `config`.
    pub fn connect(
        client: reqwest::Client,
        config: &Config,
        target: Uuid,
        has_permission: bool,
    ) -> Result<ConsoleSession, EndpointError> {
        let endpoint = config.endpoint();
        let url = endpoint.console_stream(target)?;
        let subscription = ConsoleSubscription::new(target, has_permission)
            .with_history_limit(config.console.history_limit)
            .with_filter(config.console.filter);
        Ok(Self::spawn(
            subscription,
            BackfillFetcher::new(client, endpoint),
            url,
            config.connect_timeout(),
        ))
    }

    /// Starts the backfill and the channel for an already built
    /// subscription. Without permission nothing is started.
    pub fn spawn(
        subscription: ConsoleSubscription,
        fetcher: BackfillFetcher,
        stream_url: Url,
        connect_timeout: Option<Duration>,
    ) -> ConsoleSession {
        let mut session = ConsoleSession {
            subscription,
            channel: None,
            backfill: None,
            pending: VecDeque::new(),
        };
        if session.subscription.state().is_terminal() {
            return session;
        }

        let target = session.subscription.target();
        let liveness = session.subscription.liveness();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = fetcher.fetch(target).await;
            if liveness.is_superseded() {
                debug!("{}: backfill finished after teardown, dropped", target);
                return;
            }
            let _ = tx.send(result);
        });

        session.backfill = Some(rx);
        session.channel = Some(PushChannel::open(stream_url, connect_timeout));
        session
    }

    pub fn subscription(&self) -> &ConsoleSubscription {
        &self.subscription
    }

    pub fn subscription_mut(&mut self) -> &mut ConsoleSubscription {
        &mut self.subscription
    }

    /// Waits for the next change. Returns `None` once both the backfill and
    /// the channel are finished, or after `close()`.
    pub async fn next_item(&mut self) -> Option<SessionItem> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.backfill.is_none() && self.channel.is_none() {
                return None;
            }

            tokio::select! {
                res = recv_backfill(&mut self.backfill) => {
                    self.backfill = None;
                    if let Ok(result) = res {
                        self.pending.extend(self.subscription.apply_backfill(result));
                    }
                }
                event = next_channel_event(&mut self.channel) => {
                    match event {
                        Some(event) => self.pending.extend(self.subscription.handle_channel(event)),
                        None => self.channel = None,
                    }
                }
            }
        }
    }

    /// Tears the subscription down and closes the channel. A backfill still
    /// in flight completes on its own, and its result is discarded.
    pub async fn close(&mut self) {
        self.subscription.teardown();
        self.backfill = None;
        self.pending.clear();
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

pub struct PerformanceSession {
    subscription: PerformanceSubscription,
    channel: Option<PushChannel>,
    pending: VecDeque<SessionItem>,
}

impl PerformanceSession {
    pub fn connect(
        config: &Config,
        target: Uuid,
        has_permission: bool,
    ) -> Result<PerformanceSession, EndpointError> {
        let url = config.endpoint().monitor(target)?;
        let subscription =
            PerformanceSubscription::new(target, has_permission, config.perf.capacity);
        Ok(Self::spawn(subscription, url, config.connect_timeout()))
    }

    pub fn spawn(
        subscription: PerformanceSubscription,
        monitor_url: Url,
        connect_timeout: Option<Duration>,
    ) -> PerformanceSession {
        let channel = if subscription.state().is_terminal() {
            None
        } else {
            Some(PushChannel::open(monitor_url, connect_timeout))
        };
        PerformanceSession {
            subscription,
            channel,
            pending: VecDeque::new(),
        }
    }

    pub fn subscription(&self) -> &PerformanceSubscription {
        &self.subscription
    }

    pub async fn next_item(&mut self) -> Option<SessionItem> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let channel = self.channel.as_mut()?;
            match channel.next_event().await {
                Some(event) => self.pending.extend(self.subscription.handle_channel(event)),
                None => self.channel = None,
            }
        }
    }

    pub async fn close(&mut self) {
        self.subscription.teardown();
        self.pending.clear();
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }
}
