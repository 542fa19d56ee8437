#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    /// Local precondition violation. Surfaced as a client-error event,
    /// never propagated across the public API as a panic.
    Client,
    /// Malformed or out-of-sequence inbound signaling. Logged, the
    /// message is discarded, the session continues.
    Protocol,
    /// Relay-originated advisory or failure.
    Server,
    /// Media-engine failure (offer/answer/description/candidate calls).
    Engine,
    /// Signaling-transport failure (connect, send, request).
    Transport,
    InvalidArgument,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl CallError {
    pub fn client(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Client,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Protocol,
            message: message.into(),
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Server,
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Engine,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::InvalidArgument,
            message: message.into(),
        }
    }

    pub fn closed() -> Self {
        Self {
            kind: CallErrorKind::Closed,
            message: "session is closed".to_string(),
        }
    }

    pub fn no_remote_peer() -> Self {
        Self {
            kind: CallErrorKind::Client,
            message: "no remote peer available for call".to_string(),
        }
    }

    pub fn media_not_ready() -> Self {
        Self {
            kind: CallErrorKind::Client,
            message: "local media has not been acquired".to_string(),
        }
    }

    pub fn is_client(&self) -> bool {
        self.kind == CallErrorKind::Client
    }

    pub fn is_protocol(&self) -> bool {
        self.kind == CallErrorKind::Protocol
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            CallErrorKind::Client => write!(f, "Client error: {}", self.message),
            CallErrorKind::Protocol => write!(f, "Protocol error: {}", self.message),
            CallErrorKind::Server => write!(f, "Server error: {}", self.message),
            CallErrorKind::Engine => write!(f, "Engine error: {}", self.message),
            CallErrorKind::Transport => write!(f, "Transport error: {}", self.message),
            CallErrorKind::InvalidArgument => write!(f, "Invalid argument: {}", self.message),
            CallErrorKind::Closed => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CallError {}
