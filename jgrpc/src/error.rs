use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    ConnectFailed,
    NoProvider,
    ConnectionLost,
    InvalidFrame,
    FrameTooLarge,
    UnknownSerializer,
    ServiceNotFound,
    MethodNotFound,
    InvocationFailed,
    SerializeFailed,
    DeserializeFailed,
    BindFailed,
    SendFailed,
    RecvFailed,
    Directory,
    InvalidArgument,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument,
            msg: value.to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(value: rmp_serde::encode::Error) -> Self {
        Self {
            kind: ErrorKind::SerializeFailed,
            msg: value.to_string(),
        }
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(value: rmp_serde::decode::Error) -> Self {
        Self {
            kind: ErrorKind::DeserializeFailed,
            msg: value.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::kind(ErrorKind::Timeout);
        assert_eq!(error.to_string(), "Timeout");

        let error = Error::new(ErrorKind::ConnectFailed, "connection refused".into());
        assert_eq!(error.to_string(), "ConnectFailed: connection refused");
    }

    #[test]
    fn test_error_from_kind() {
        let error: Error = ErrorKind::NoProvider.into();
        assert_eq!(error.kind, ErrorKind::NoProvider);
        assert!(error.msg.is_empty());
    }

    #[test]
    fn test_from_rmp_serde_errors() {
        let e: Error = rmp_serde::encode::Error::UnknownLength.into();
        assert_eq!(e.kind, ErrorKind::SerializeFailed);

        let invalid = vec![0xFF, 0xFF, 0xFF];
        let e: Error = rmp_serde::from_slice::<String>(&invalid).unwrap_err().into();
        assert_eq!(e.kind, ErrorKind::DeserializeFailed);
        assert!(!e.msg.is_empty());
    }
}
