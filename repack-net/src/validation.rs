// repack-net/src/validation.rs
use repack_common::error::{RepackError, Result};
use url::Url;

/// Validates a source URL, ensuring it uses the HTTPS scheme.
pub fn validate_source_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| RepackError::ValidationError(format!("Failed to parse URL '{url_str}': {e}")))?;
    if url.scheme() == "https" {
        Ok(url)
    } else {
        Err(RepackError::ValidationError(format!(
            "Invalid URL scheme for '{}': Must be https, but got '{}'",
            url_str,
            url.scheme()
        )))
    }
}

/// Rejects a declared payload size before any bytes hit the disk.
pub fn check_declared_size(declared: Option<u64>, ceiling: u64, what: &str) -> Result<()> {
    if let Some(size) = declared {
        if size > ceiling {
            return Err(RepackError::SizeLimit(format!(
                "{what} is {size} bytes, exceeding the configured limit of {ceiling} bytes"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_only() {
        assert!(validate_source_url("https://example.com/p.difypkg").is_ok());
        assert!(validate_source_url("http://example.com/p.difypkg").is_err());
        assert!(validate_source_url("file:///tmp/p.difypkg").is_err());
        assert!(validate_source_url("not a url").is_err());
    }

    #[test]
    fn declared_size_ceiling() {
        assert!(check_declared_size(Some(10), 100, "upload").is_ok());
        assert!(check_declared_size(None, 100, "upload").is_ok());
        let err = check_declared_size(Some(101), 100, "upload").unwrap_err();
        assert!(err.to_string().contains("limit"));
    }
}
