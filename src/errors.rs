/// Errors raised while establishing or reading the backend connection,
/// before they are normalized into the public failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Endpoint configuration was invalid at connect time.
    #[error("endpoint error: {0}")]
    Endpoint(String),
    /// Backend rejected the request with a non-success HTTP status.
    #[error("backend returned status {status}: {body}")]
    Http { status: u16, body: String },
    /// Transport-level failure (DNS, TCP, TLS, or a read error mid-stream).
    #[error("i/o error: {0}")]
    Io(String),
}

/// Failure reason carried by a terminal `Failed` notification.
///
/// Every failure is resolved inside the session and surfaced exactly once;
/// partial content delivered before the failure remains valid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum StreamError {
    /// Malformed event framing or payload.
    #[error("decode failure: {0}")]
    Decode(String),
    /// Connection-level failure, including idle-read timeout and a stream
    /// that closed without a terminal event.
    #[error("connection failure: {0}")]
    Connection(String),
    /// The backend itself reported an error event.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl From<ConnectError> for StreamError {
    fn from(value: ConnectError) -> Self {
        match value {
            ConnectError::Endpoint(message) => StreamError::Connection(message),
            ConnectError::Http { status, body } => {
                StreamError::Connection(format!("status {status}: {body}"))
            }
            ConnectError::Io(message) => StreamError::Connection(message),
        }
    }
}

/// Top-level error type for the public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantError {
    /// Invalid client or endpoint configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid request input (empty model, no messages, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// Terminal failure from a started session.
    #[error(transparent)]
    Stream(StreamError),
    /// The session was cancelled before reaching completion.
    #[error("session cancelled")]
    Cancelled,
    /// Internal invariant violation or API misuse.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl AssistantError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<StreamError> for AssistantError {
    fn from(value: StreamError) -> Self {
        AssistantError::Stream(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_normalizes_to_connection_failure() {
        let err = ConnectError::Http {
            status: 503,
            body: "overloaded".into(),
        };
        assert_eq!(
            StreamError::from(err),
            StreamError::Connection("status 503: overloaded".into())
        );
    }
}
