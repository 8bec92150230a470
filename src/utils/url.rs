//! Endpoint URL construction.

/// Strip trailing slashes so endpoints can be appended safely.
///
/// ```
/// use chatdesk::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.example.com/v1///"), "https://api.example.com/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path without doubling the slash.
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{normalized_base}/{endpoint}")
}

/// The base URL to talk to: the user's override when one is configured,
/// otherwise the provider's own.
pub fn effective_base_url<'a>(override_url: &'a str, provider_base: &'a str) -> &'a str {
    if override_url.trim().is_empty() {
        provider_base
    } else {
        override_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_only_trailing_slashes() {
        assert_eq!(normalize_base_url("https://api.example.com/v1"), "https://api.example.com/v1");
        assert_eq!(normalize_base_url("https://api.example.com/"), "https://api.example.com");
        assert_eq!(normalize_base_url(" http://localhost:4000/ "), "http://localhost:4000");
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn construct_api_url_joins_without_double_slashes() {
        assert_eq!(
            construct_api_url("https://api.example.com/v1/", "/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            construct_api_url("https://api.example.com/v1///", "///chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn override_wins_when_set() {
        assert_eq!(
            effective_base_url("", "https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            effective_base_url("   ", "https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            effective_base_url("http://localhost:4000", "https://api.openai.com/v1"),
            "http://localhost:4000"
        );
    }
}
