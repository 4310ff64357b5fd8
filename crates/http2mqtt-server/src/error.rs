use std::borrow::Cow;

/// All possible error kinds of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// The configuration file is missing, malformed or invalid.
    Config,
    /// A network or file system operation failed.
    Io,
    /// A bridge component could not be created.
    Bridge,
}

impl ErrorKind {
    const fn description(self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Io => "Input/Output",
            Self::Bridge => "Bridge",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A server error.
#[derive(Debug, PartialEq)]
pub(crate) struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub(crate) fn config(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Config, description)
    }

    #[cfg(test)]
    pub(crate) const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::config(e.to_string())
    }
}

impl From<http2mqtt::error::Error> for Error {
    fn from(e: http2mqtt::error::Error) -> Self {
        Self::new(ErrorKind::Bridge, e.to_string())
    }
}

pub(crate) type Result<T> = std::result::Result<T, Error>;
