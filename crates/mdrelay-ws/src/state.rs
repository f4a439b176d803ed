//! Subscription channel state machine.
//!
//! `ChannelState::on` is total: every (state, input) pair has a defined
//! successor, most of them "stay".

use std::fmt;

/// Lifecycle state of a push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a reconnect delay.
    Backoff,
}

/// Inputs driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelInput {
    /// Caller or supervisor wants a connection.
    ConnectRequested,
    /// Transport handshake completed.
    ConnectSucceeded,
    /// Transport lost, connect failed, or keys dropped to zero.
    Disconnected,
    /// An update arrived on the live session.
    PushReceived,
    /// A reconnect delay was scheduled.
    BackoffStarted,
    /// The reconnect delay ran out.
    BackoffElapsed,
}

impl ChannelInput {
    pub const ALL: [ChannelInput; 6] = [
        ChannelInput::ConnectRequested,
        ChannelInput::ConnectSucceeded,
        ChannelInput::Disconnected,
        ChannelInput::PushReceived,
        ChannelInput::BackoffStarted,
        ChannelInput::BackoffElapsed,
    ];
}

impl ChannelState {
    pub const ALL: [ChannelState; 4] = [
        ChannelState::Disconnected,
        ChannelState::Connecting,
        ChannelState::Connected,
        ChannelState::Backoff,
    ];

    /// Successor state for `input`.
    pub fn on(self, input: ChannelInput) -> ChannelState {
        use ChannelInput as I;
        use ChannelState as S;

        match (self, input) {
            (S::Disconnected, I::ConnectRequested) => S::Connecting,
            (S::Disconnected, I::BackoffStarted) => S::Backoff,
            (S::Disconnected, _) => S::Disconnected,

            (S::Connecting, I::ConnectSucceeded) => S::Connected,
            (S::Connecting, I::Disconnected) => S::Disconnected,
            (S::Connecting, _) => S::Connecting,

            (S::Connected, I::Disconnected) => S::Disconnected,
            (S::Connected, _) => S::Connected,

            (S::Backoff, I::BackoffElapsed | I::ConnectRequested) => S::Connecting,
            (S::Backoff, I::Disconnected) => S::Disconnected,
            (S::Backoff, _) => S::Backoff,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
