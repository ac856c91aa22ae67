//! Request URL construction for the session pool management endpoint.

pub const API_VERSION: &str = "2024-02-02-preview";

/// Joins `relative_path` onto `base_endpoint` and appends the session
/// `identifier` and `api-version` query parameters.
pub fn build_url(base_endpoint: &str, session_id: &str, relative_path: &str) -> String {
    let mut url = format!(
        "{}/{}",
        base_endpoint.trim_end_matches('/'),
        relative_path.trim_start_matches('/')
    );

    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str("identifier=");
    url.push_str(&urlencoding::encode(session_id));
    url.push_str("&api-version=");
    url.push_str(API_VERSION);
    url
}
