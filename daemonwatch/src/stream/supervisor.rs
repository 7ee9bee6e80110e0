//! Connection status
//!
//! The supervisor derives one `ConnectionState` from the permission check
//! made at subscription creation, the backfill completion and the push
//! channel lifecycle. It never reconnects: `Closed`, `Error` and
//! `NoPermission` are terminal for the subscription that reached them.

use crossterm::style::Color;
use tracing::debug;

/// WebSocket close code for a normal, graceful close.
pub const NORMAL_CLOSE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The caller may not observe this target.
    NoPermission,
    /// Neither the backfill nor the channel is ready yet.
    Loading,
    /// Backfill arrived, the channel has not opened yet.
    Buffered,
    /// Backfill arrived and the channel is open.
    Live,
    /// The channel is open but the backfill is missing.
    LiveNoBuffer,
    Closed,
    Error,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::NoPermission | ConnectionState::Closed | ConnectionState::Error
        )
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Live | ConnectionState::LiveNoBuffer)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::NoPermission => "No permission to view this console",
            ConnectionState::Loading => "Connecting...",
            ConnectionState::Buffered => "History loaded, waiting for live stream",
            ConnectionState::Live => "Live",
            ConnectionState::LiveNoBuffer => "Live (history unavailable)",
            ConnectionState::Closed => "Connection closed",
            ConnectionState::Error => "Connection error",
        }
    }

    pub fn color(&self) -> Color {
        match self {
            ConnectionState::Live => Color::Green,
            ConnectionState::LiveNoBuffer | ConnectionState::Buffered => Color::Yellow,
            ConnectionState::Loading => Color::Grey,
            ConnectionState::Closed => Color::DarkGrey,
            ConnectionState::NoPermission | ConnectionState::Error => Color::Red,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    channel_open: bool,
    backfill_done: bool,
}

impl ConnectionSupervisor {
    pub fn new(has_permission: bool) -> ConnectionSupervisor {
        ConnectionSupervisor {
            state: if has_permission {
                ConnectionState::Loading
            } else {
                ConnectionState::NoPermission
            },
            channel_open: false,
            backfill_done: false,
        }
    }

    /// A supervisor for a stream that has no backfill: opening the channel
    /// goes straight to `Live`.
    pub fn without_backfill(has_permission: bool) -> ConnectionSupervisor {
        let mut sup = Self::new(has_permission);
        sup.backfill_done = true;
        sup
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Each transition method returns the new state when it changed.
    pub fn channel_opened(&mut self) -> Option<ConnectionState> {
        if self.state.is_terminal() || self.channel_open {
            return None;
        }
        self.channel_open = true;
        self.set(if self.backfill_done {
            ConnectionState::Live
        } else {
            ConnectionState::LiveNoBuffer
        })
    }

    pub fn backfill_completed(&mut self) -> Option<ConnectionState> {
        if self.state.is_terminal() || self.backfill_done {
            return None;
        }
        self.backfill_done = true;
        self.set(if self.channel_open {
            ConnectionState::Live
        } else {
            ConnectionState::Buffered
        })
    }

    pub fn channel_closed(&mut self, code: u16) -> Option<ConnectionState> {
        if self.state.is_terminal() {
            return None;
        }
        self.channel_open = false;
        self.set(if code == NORMAL_CLOSE {
            ConnectionState::Closed
        } else {
            ConnectionState::Error
        })
    }

    pub fn channel_failed(&mut self) -> Option<ConnectionState> {
        if self.state.is_terminal() {
            return None;
        }
        self.channel_open = false;
        self.set(ConnectionState::Error)
    }

    fn set(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if next == self.state {
            return None;
        }
        debug!("connection state {:?} -> {:?}", self.state, next);
        self.state = next;
        Some(next)
    }
}
