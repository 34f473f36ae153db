use crate::session::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- transport errors ------------------------------------------
    #[error("malformed frame: {0}")]
    Frame(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    // --------------------------------- protocol sequencing errors --------------------------------
    #[error("`{command}` is not allowed while session is {state}")]
    InvalidState {
        command: &'static str,
        state: SessionState,
    },
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("variables are still being fetched, retry later")]
    FetchInProgress,

    // --------------------------------- backend errors --------------------------------------------
    #[error("{0}")]
    Backend(String),
    #[error("backend did not answer `{0}` in time")]
    Timeout(String),
    #[error("backend exited")]
    BackendExited,
    #[error("backend is gone")]
    BackendGone,
    #[error("debuggee is not launched")]
    NotLaunched,

    // --------------------------------- resource errors -------------------------------------------
    #[error("spawn `{0}`: {1}")]
    Spawn(String, String),
    #[error("configuration: {0}")]
    Config(String),
    #[error("send signal: {0}")]
    Signal(nix::Error),

    // --------------------------------- parsing errors --------------------------------------------
    #[error("missing field `{0}` in backend record")]
    MissingField(&'static str),
}

impl Error {
    /// Return a hint to the protocol loop - keep serving the client after an error or drop it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Frame(_) => false,
            Error::Json(_) => false,
            Error::InvalidState { .. } => false,
            Error::UnsupportedCommand(_) => false,
            Error::InvalidArguments(_) => false,
            Error::FetchInProgress => false,
            Error::Backend(_) => false,
            Error::Timeout(_) => false,
            Error::BackendExited => false,
            Error::BackendGone => false,
            Error::NotLaunched => false,
            Error::Spawn(_, _) => false,
            Error::Config(_) => false,
            Error::Signal(_) => false,
            Error::MissingField(_) => false,

            // client connection is unusable
            Error::Io(_) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "midap", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "midap", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
