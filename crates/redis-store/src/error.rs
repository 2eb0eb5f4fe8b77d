use redis::{ErrorKind, RedisError};

use loadgen_core::{ClientError, ClientErrorKind};

/// Classify a redis error for the engine's error-kind histogram.
pub fn map_error(e: &RedisError) -> ClientError {
    let kind = if e.is_timeout() {
        ClientErrorKind::Timeout
    } else if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
        ClientErrorKind::Connection
    } else {
        match e.kind() {
            ErrorKind::ResponseError
            | ErrorKind::ExecAbortError
            | ErrorKind::TypeError
            | ErrorKind::BusyLoadingError
            | ErrorKind::NoScriptError
            | ErrorKind::ReadOnly
            | ErrorKind::ExtensionError => ClientErrorKind::Response,
            ErrorKind::AuthenticationFailed | ErrorKind::InvalidClientConfig => {
                ClientErrorKind::Connection
            }
            _ => ClientErrorKind::Other,
        }
    };
    ClientError::new(kind, e.to_string())
}

/// Whether the connection that produced `e` can no longer be trusted.
pub(crate) fn is_connection_lost(e: &RedisError) -> bool {
    e.is_timeout() || e.is_connection_dropped() || e.is_io_error()
}
