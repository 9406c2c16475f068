use std::fmt::Display;

/// A type alias for `std::result::Result` with a custom `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents the various types of errors that can occur within the application.
#[derive(Debug)]
pub enum Error {
    /// A key-expression string (e.g. `"Ctrl-Alt-Q"`) could not be parsed.
    InvalidExpression(String),
    /// A key or modifier name is not recognized under the current layout.
    UnknownKey(String),
    /// Indicates an issue with the application's configuration, with a descriptive message.
    InvalidConfig(String),
    /// A config file failed to load or parse; the caller retains the prior configuration.
    ConfigLoad(String),
    /// A registered action closure returned an error while running.
    ActionFailed(String),
    /// A host port (hook, accessibility, clipboard, ...) operation failed.
    Host(String),
    /// The hook did not respond within the expected window.
    HookTimeout,
    /// Indicates that a requested item was not found, with a descriptive message.
    NotFound(String),
    /// Indicates a permission error.
    PermissionDenied(String),
    /// Represents an I/O error, typically from `std::io::Error`.
    IO(String),
    /// A generic error with a descriptive message.
    Generic(String),
}

impl Error {
    #[allow(clippy::needless_pass_by_value)]
    pub fn new<S: ToString + Display>(flavor: std::io::ErrorKind, msg: S) -> Self {
        Error::Generic(format!("{flavor}: {msg}"))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Error::InvalidExpression(msg) => format!("invalid key expression: {msg}"),
            Error::UnknownKey(msg) => format!("unknown key: {msg}"),
            Error::InvalidConfig(msg) => format!("invalid configuration: {msg}"),
            Error::ConfigLoad(msg) => format!("config load failed: {msg}"),
            Error::ActionFailed(msg) => format!("action failed: {msg}"),
            Error::Host(msg) => format!("host error: {msg}"),
            Error::HookTimeout => "hook did not respond in time".to_string(),
            Error::NotFound(msg) => format!("not found: {msg}"),
            Error::PermissionDenied(msg) => format!("permission denied: {msg}"),
            Error::IO(msg) => format!("IO error: {msg}"),
            Error::Generic(msg) => format!("generic error: {msg}"),
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for Error {}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigLoad(format!("{err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Generic(format!("{err}"))
    }
}

impl<T> From<std::sync::mpsc::SendError<T>> for Error {
    fn from(err: std::sync::mpsc::SendError<T>) -> Self {
        Error::Generic(format!("{err}"))
    }
}

impl From<std::sync::mpsc::RecvError> for Error {
    fn from(err: std::sync::mpsc::RecvError) -> Self {
        Error::Generic(format!("{err}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("{err}")),
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(format!("{err}")),
            _ => Error::IO(format!("{err}")),
        }
    }
}
