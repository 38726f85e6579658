//! Route handlers for the HTTP API.

pub mod formats;
pub mod health;
pub mod jobs;
pub mod upload;

/// Parse a path segment as a typed id, mapping failure to a 400.
pub(crate) fn parse_id<T: std::str::FromStr>(raw: &str, entity: &str) -> rf_core::Result<T> {
    raw.parse()
        .map_err(|_| rf_core::Error::Validation(format!("invalid {entity} id: {raw}")))
}
