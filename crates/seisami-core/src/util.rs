//! Small string helpers for URLs and tokens.

/// Trimmed value, or `None` when blank.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Response bodies quoted in errors are cut to 180 chars.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Derive the WebSocket URL for an HTTP API base, e.g. `https://x` -> `wss://x`.
pub fn websocket_url(base: &str, path: &str) -> Option<String> {
    let base = base.trim().trim_end_matches('/');
    let rest = base
        .strip_prefix("https://")
        .map(|rest| format!("wss://{rest}"))
        .or_else(|| base.strip_prefix("http://").map(|rest| format!("ws://{rest}")))?;
    Some(format!("{rest}/{}", path.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn websocket_url_swaps_scheme() {
        assert_eq!(
            websocket_url("https://api.example.com/", "/v1/sync/ws").as_deref(),
            Some("wss://api.example.com/v1/sync/ws")
        );
        assert_eq!(
            websocket_url("http://127.0.0.1:8080", "v1/sync/ws").as_deref(),
            Some("ws://127.0.0.1:8080/v1/sync/ws")
        );
        assert_eq!(websocket_url("ftp://nope", "x"), None);
    }
}
