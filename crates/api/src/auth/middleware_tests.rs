//! Unit tests for session middleware helpers
//!
//! Tests cover:
//! - Session token extraction (cookie, `Session` scheme)
//! - Bearer ID token extraction
//! - Client IP and User-Agent capture for audit entries

#[cfg(test)]
mod tests {
    use super::super::middleware::*;
    use axum::http::{header, HeaderMap, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_session_token_from_cookie() {
        let h = headers(&[("cookie", "theme=dark; session=abc123; other=1")]);
        assert_eq!(extract_session_token(&h).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_session_token_from_authorization_scheme() {
        let h = headers(&[("authorization", "Session tok-9")]);
        assert_eq!(extract_session_token(&h).as_deref(), Some("tok-9"));
    }

    #[test]
    fn test_cookie_wins_over_header() {
        let h = headers(&[
            ("cookie", "session=from-cookie"),
            ("authorization", "Session from-header"),
        ]);
        assert_eq!(extract_session_token(&h).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_bearer_is_not_a_session() {
        let h = headers(&[("authorization", "Bearer id-token")]);
        assert_eq!(extract_session_token(&h), None);
        assert_eq!(extract_bearer_token(&h).as_deref(), Some("id-token"));
    }

    #[test]
    fn test_empty_tokens_ignored() {
        let h = headers(&[("cookie", "session="), ("authorization", "Bearer  ")]);
        assert_eq!(extract_session_token(&h), None);
        assert_eq!(extract_bearer_token(&h), None);
    }

    #[test]
    fn test_ip_prefers_first_forwarded_hop() {
        let h = headers(&[
            ("x-forwarded-for", "198.51.100.7, 10.0.0.1"),
            ("cf-connecting-ip", "192.0.2.1"),
        ]);
        assert_eq!(extract_ip_address(&h).as_deref(), Some("198.51.100.7"));
    }

    #[test]
    fn test_ip_fallbacks() {
        let h = headers(&[("cf-connecting-ip", "192.0.2.1")]);
        assert_eq!(extract_ip_address(&h).as_deref(), Some("192.0.2.1"));

        let h = headers(&[("x-real-ip", "192.0.2.2")]);
        assert_eq!(extract_ip_address(&h).as_deref(), Some("192.0.2.2"));

        assert_eq!(extract_ip_address(&HeaderMap::new()), None);
    }

    #[test]
    fn test_client_info_captures_user_agent() {
        let mut h = headers(&[("x-real-ip", "192.0.2.2")]);
        h.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));

        let info = client_info(&h);
        assert_eq!(info.ip_address.as_deref(), Some("192.0.2.2"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));
    }
}
