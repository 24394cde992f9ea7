/// Compare the status API key in constant time.
///
/// An empty expected key never matches: a status server started without a key
/// keeps `/metrics` closed.
pub fn verify_api_key(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }

    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    provided.len() == expected.len()
        && provided
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_api_key_valid() {
        assert!(verify_api_key("status-key", "status-key"));
    }

    #[test]
    fn test_verify_api_key_invalid() {
        assert!(!verify_api_key("wrong-key!", "status-key"));
    }

    #[test]
    fn test_verify_api_key_different_length() {
        assert!(!verify_api_key("short", "much-longer-key"));
    }

    #[test]
    fn test_verify_api_key_empty_expected_never_matches() {
        assert!(!verify_api_key("", ""));
        assert!(!verify_api_key("anything", ""));
    }

    #[test]
    fn test_verify_api_key_case_sensitive() {
        assert!(!verify_api_key("Status-Key", "status-key"));
    }
}
