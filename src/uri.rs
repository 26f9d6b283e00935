//! Resolving server-assigned resource locations.
use url::Url;

/// Resolve a `Location` header value against the URL the request targeted.
///
/// Servers return absolute URLs, absolute paths, or relative paths; all
/// three resolve per RFC 3986.
pub(crate) fn resolve_location(base: &Url, location: &str) -> Result<Url, url::ParseError> {
    base.join(location)
}
