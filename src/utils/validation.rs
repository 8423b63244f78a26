use std::path::Path;
use thiserror::Error;

/// Longest accepted upload id.
pub const MAX_UPLOAD_ID_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Sanitizes a client-supplied file name so it can be used as a single path
/// component under the uploads directory.
pub fn sanitize_filename(filename: &str) -> Result<String, ValidationError> {
    // Normalize Windows separators so the last component is picked either way
    let normalized = filename.replace('\\', "/");
    let name = Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name.is_empty() {
        return Err(ValidationError::new(
            "INVALID_FILENAME",
            "Filename cannot be empty",
        ));
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ';')
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 255 {
        let mut end = 255;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    // Dot-prefixed names are reserved for in-progress artifacts
    if sanitized.starts_with('.') {
        return Err(ValidationError::new(
            "HIDDEN_FILE",
            "Hidden files (starting with '.') are not allowed",
        ));
    }

    Ok(sanitized)
}

/// Upload ids become directory names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_upload_id(upload_id: &str) -> Result<(), ValidationError> {
    if upload_id.is_empty() || upload_id.len() > MAX_UPLOAD_ID_LEN {
        return Err(ValidationError::new(
            "INVALID_UPLOAD_ID",
            format!("Upload id must be 1 to {MAX_UPLOAD_ID_LEN} characters"),
        ));
    }

    if !upload_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::new(
            "INVALID_UPLOAD_ID",
            "Upload id may only contain letters, digits, '-' and '_'",
        ));
    }

    Ok(())
}

/// Resolves the staging key for a chunk: the opaque upload id when given,
/// otherwise the sanitized file name.
pub fn staging_key(upload_id: Option<&str>, sanitized_name: &str) -> Result<String, ValidationError> {
    match upload_id {
        Some(id) => {
            validate_upload_id(id)?;
            Ok(id.to_string())
        }
        None => Ok(sanitized_name.to_string()),
    }
}

/// Accepts anything [`staging_key`] can produce: an upload id or a sanitized
/// file name.
pub fn validate_staging_key(key: &str) -> Result<(), ValidationError> {
    if validate_upload_id(key).is_ok() {
        return Ok(());
    }
    match sanitize_filename(key) {
        Ok(sanitized) if sanitized == key => Ok(()),
        _ => Err(ValidationError::new(
            "INVALID_UPLOAD_ID",
            format!("'{key}' is not a valid upload id"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test.pdf").unwrap(), "test.pdf");
        assert_eq!(sanitize_filename("my file.doc").unwrap(), "my file.doc");
        assert_eq!(
            sanitize_filename("test<script>.mp4").unwrap(),
            "test_script_.mp4"
        );
        assert_eq!(sanitize_filename("测试.txt").unwrap(), "测试.txt");

        // Path traversal
        assert_eq!(sanitize_filename("../../../etc/passwd").unwrap(), "passwd");
        assert_eq!(
            sanitize_filename("..\\..\\windows\\system32").unwrap(),
            "system32"
        );

        // Hidden files and empty names
        assert!(sanitize_filename(".htaccess").is_err());
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("..").is_err());
    }

    #[test]
    fn test_sanitize_filename_truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let sanitized = sanitize_filename(&long).unwrap();
        assert!(sanitized.len() <= 255);
        assert!(sanitized.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_validate_upload_id() {
        assert!(validate_upload_id("3f0c2a8e-5b1d-4c7a-9e3f-0a1b2c3d4e5f").is_ok());
        assert!(validate_upload_id("upload_01").is_ok());
        assert!(validate_upload_id("").is_err());
        assert!(validate_upload_id("../escape").is_err());
        assert!(validate_upload_id("a b").is_err());
        assert!(validate_upload_id(&"x".repeat(MAX_UPLOAD_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_staging_key_prefers_upload_id() {
        assert_eq!(staging_key(Some("abc-123"), "movie.mp4").unwrap(), "abc-123");
        assert_eq!(staging_key(None, "movie.mp4").unwrap(), "movie.mp4");
        assert!(staging_key(Some("../x"), "movie.mp4").is_err());
    }

    #[test]
    fn test_validate_staging_key() {
        assert!(validate_staging_key("abc-123").is_ok());
        assert!(validate_staging_key("holiday video.mp4").is_ok());
        assert!(validate_staging_key("..").is_err());
        assert!(validate_staging_key("a<b").is_err());
    }
}
