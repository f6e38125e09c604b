use thiserror::Error;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Failure kinds surfaced to the UI layer.
///
/// No raw transport error crosses a component boundary; every failure is
/// classified into one of these before it leaves the client crate.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local validation failed. Never reaches the network.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported model '{requested}' (supported: {})", supported.join(", "))]
    UnsupportedModel { requested: String, supported: Vec<String> },

    #[error("invalid page window: page={page}, page_size={page_size}")]
    InvalidPageWindow { page: u32, page_size: u32 },

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused or host unreachable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 4xx from the service, detail carried verbatim.
    #[error("rejected by service ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("service fault ({status}): {message}")]
    RemoteFault { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("telemetry stream for job {job_id} dropped: {reason}")]
    StreamDropped { job_id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cache storage error: {0}")]
    Storage(String),
}

/// Copyable discriminant of [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    UnsupportedModel,
    InvalidPageWindow,
    Timeout,
    ServiceUnavailable,
    RemoteRejected,
    RemoteFault,
    MalformedResponse,
    StreamDropped,
    Config,
    Storage,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::UnsupportedModel { .. } => ErrorKind::UnsupportedModel,
            Self::InvalidPageWindow { .. } => ErrorKind::InvalidPageWindow,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            Self::RemoteFault { .. } => ErrorKind::RemoteFault,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Self::StreamDropped { .. } => ErrorKind::StreamDropped,
            Self::Config(_) => ErrorKind::Config,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True for errors produced before any network call was made.
    pub fn is_local(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidInput
                | ErrorKind::UnsupportedModel
                | ErrorKind::InvalidPageWindow
                | ErrorKind::Config
        )
    }

    /// Short recovery hint for the UI.
    pub fn remediation(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidInput | ErrorKind::InvalidPageWindow => "Correct the input and retry.",
            ErrorKind::UnsupportedModel => "Pick one of the supported model aliases.",
            ErrorKind::Timeout => "The service is slow to respond. Try again.",
            ErrorKind::ServiceUnavailable => {
                "The service is not running or not reachable. Start the backend and retry."
            }
            ErrorKind::RemoteRejected => "The service refused the request in the job's current state.",
            ErrorKind::RemoteFault => "The service failed internally. Check the backend logs.",
            ErrorKind::MalformedResponse => "The service returned an unexpected payload.",
            ErrorKind::StreamDropped => "Live updates stopped. Reconnect to keep following the job.",
            ErrorKind::Config => "Fix the configuration file or environment.",
            ErrorKind::Storage => "The local cache could not be read or written.",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}
