//! Customized unified error type.

use std::fmt;
use std::io;
use std::net;
use std::num;

/// Customized error type for the copyset client.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ClientError(pub String);

impl ClientError {
    /// Creates an error out of anything printable.
    pub fn msg(m: impl fmt::Display) -> Self {
        ClientError(m.to_string())
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `ClientError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ClientError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ClientError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(num::ParseIntError);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ClientError("stale leader hint".into());
        assert_eq!(format!("{}", e), String::from("stale leader hint"));
    }

    #[test]
    fn from_io_error() {
        let io_error =
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let e = ClientError::from(io_error);
        assert!(e.0.contains("refused"));
    }
}
