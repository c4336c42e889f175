use url::Url;

use crate::error::ClientError;

/// Trims user input and rejects empty or whitespace-only values.
///
/// No other validation happens client side; the server decides whether it can
/// extract anything from the URL.
pub fn normalize_input(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Returns `true` if the string parses as an http(s) URL.
///
/// The CLI uses this to warn about likely typos before contacting the server.
pub fn looks_like_http_url(input: &str) -> bool {
    Url::parse(input.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Parse and normalize the server base URL.
///
/// Normalization rules:
/// - Only accepts http/https
/// - Removes fragments, query strings and default ports
/// - Guarantees a trailing `/` so endpoint segments append instead of replacing
pub fn parse_base_url(input: &str) -> Result<Url, ClientError> {
    let trimmed = input.trim();
    let mut url = Url::parse(trimmed)
        .map_err(|e| ClientError::validation(format!("Invalid server URL {trimmed:?}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ClientError::validation(format!(
                "Unsupported server URL scheme: {other}"
            )))
        }
    }

    url.set_fragment(None);
    url.set_query(None);

    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = url.set_port(None);
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Build an endpoint URL below `base`, percent-encoding each segment.
///
/// Example: `endpoint(base, &["api", "get_file", "a b.mp3"])` ->
/// `<base>/api/get_file/a%20b.mp3`
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| ClientError::validation(format!("Server URL cannot be a base: {base}")))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

/// A safe local file name for a server-provided filename.
///
/// Mirrors the server's own basename check: path components are stripped and
/// characters that are invalid on common filesystems are replaced.
pub fn local_file_name(filename: &str) -> String {
    let base = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);
    let cleaned = sanitize_filename::sanitize(base);
    if cleaned.trim().is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}
