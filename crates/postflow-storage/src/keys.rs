/// Build the storage key for content with the given hash.
///
/// Files are fanned out by the first two hex characters of the hash so no
/// single directory grows unbounded.
pub fn content_key(kind: &str, content_hash: &str, extension: &str) -> String {
    let prefix = content_hash.get(..2).unwrap_or("00");
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() {
        format!("media/{}/{}/{}", kind, prefix, content_hash)
    } else {
        format!("media/{}/{}/{}.{}", kind, prefix, content_hash, extension)
    }
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> bool {
    !key.is_empty() && !key.contains("..") && !key.starts_with('/') && !key.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_fan_out_by_hash_prefix() {
        assert_eq!(
            content_key("image", "abcdef0123", "png"),
            "media/image/ab/abcdef0123.png"
        );
        assert_eq!(content_key("audio", "ff", ".mp3"), "media/audio/ff/ff.mp3");
    }

    #[test]
    fn traversal_keys_are_invalid() {
        assert!(validate_key("media/image/ab/abc.png"));
        assert!(!validate_key("../etc/passwd"));
        assert!(!validate_key("/absolute"));
        assert!(!validate_key(""));
    }
}
