use std::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operation targeted a switch without registered details.
    UnknownDevice,
    /// A device did not answer or answered with unexpected data.
    Device,
    /// The message bus refused a publication or a subscription.
    Bus,
    /// A payload could not be encoded or decoded.
    InvalidPayload,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::UnknownDevice => "Unknown Device",
            Self::Device => "Device",
            Self::Bus => "Message Bus",
            Self::InvalidPayload => "Invalid Payload",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A bridge error.
#[derive(Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidPayload, e.to_string())
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};

    #[test]
    fn error_display() {
        let error = Error::new(ErrorKind::UnknownDevice, "Switch `10.0.0.2` not registered");

        assert_eq!(error.kind(), ErrorKind::UnknownDevice);
        assert_eq!(
            error.to_string(),
            "Unknown Device: Switch `10.0.0.2` not registered"
        );
    }

    #[test]
    fn json_error_is_invalid_payload() {
        let json_error = serde_json::from_str::<u32>("not a number").unwrap_err();
        let error = Error::from(json_error);

        assert_eq!(error.kind(), ErrorKind::InvalidPayload);
    }
}
