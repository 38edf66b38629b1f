/// Input validation for command arguments
use thiserror::Error;

use crate::model::Endpoint;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Server address cannot be empty")]
    HostEmpty,

    #[error("Server address too long (max 253 characters, got {0})")]
    HostTooLong(usize),

    #[error("Server address contains invalid characters")]
    HostInvalidChars,

    #[error("Port must be between 1 and 65535 (got {0})")]
    PortOutOfRange(i64),
}

/// Validates a server host name or IP address
///
/// Rules:
/// - Cannot be empty
/// - Max 253 characters (DNS name limit)
/// - Only alphanumerics, '.', '-', ':' (IPv6) and '_'
pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::HostEmpty);
    }

    if host.len() > 253 {
        return Err(ValidationError::HostTooLong(host.len()));
    }

    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_'))
    {
        return Err(ValidationError::HostInvalidChars);
    }

    Ok(())
}

/// Validates a query port
pub fn validate_port(port: i64) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ValidationError::PortOutOfRange(port)),
    }
}

/// Validates and builds an endpoint from raw command input
pub fn parse_endpoint(host: &str, port: i64) -> Result<Endpoint, ValidationError> {
    let host = host.trim();
    validate_host(host)?;
    let port = validate_port(port)?;
    Ok(Endpoint::new(host, port))
}
