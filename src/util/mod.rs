use thiserror::Error;
use url::Url;

/// Errors that can occur while canonicalizing an article URL.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
}

/// Normalizes an article URL into its canonical deduplication key.
///
/// Two fetches of the same article must map to the same string, so the
/// normalization is deliberately conservative:
/// - host is lowercased and default ports dropped (handled by the `url` crate)
/// - the fragment is stripped (never significant for identity)
/// - a trailing slash on a non-root path is trimmed
///
/// Query strings are kept as-is: some publishers address articles through
/// query parameters, so dropping them would merge distinct articles.
///
/// # Examples
///
/// ```
/// use feedsync::util::canonicalize_url;
///
/// let a = canonicalize_url("HTTPS://Example.com:443/post/1/#comments").unwrap();
/// let b = canonicalize_url("https://example.com/post/1").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn canonicalize_url(raw: &str) -> Result<String, UrlError> {
    let mut url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }

    url.set_fragment(None);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_owned();
        url.set_path(&trimmed);
    }

    Ok(url.to_string())
}
