use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a configured site URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// Base URLs are joined with paths, so query strings and fragments would be lost.
    #[error("Base URL must not contain a query or fragment")]
    QueryOrFragment,
}

/// Validates a site base URL (API or media root).
///
/// Accepts only `http`/`https` URLs with a host and without query or
/// fragment. A trailing slash is removed so endpoint paths can be appended
/// with `format!("{base}/...")`.
///
/// # Examples
///
/// ```
/// use chanwatch::util::validate_base_url;
///
/// let url = validate_base_url("https://a.4cdn.org/").unwrap();
/// assert_eq!(url, "https://a.4cdn.org");
///
/// assert!(validate_base_url("file:///etc/passwd").is_err());
/// assert!(validate_base_url("https://example.com/?q=1").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<String, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if url.host_str().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    if url.query().is_some() || url.fragment().is_some() {
        return Err(UrlValidationError::QueryOrFragment);
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}
