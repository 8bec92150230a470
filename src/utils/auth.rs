//! Provider-specific authentication headers.

use crate::core::catalog::BuiltinProvider;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Add the provider's authentication headers to a request.
///
/// Anthropic-mode providers take the key in `x-api-key` together with an
/// `anthropic-version` header; everything else uses `Authorization: Bearer`.
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    provider: &BuiltinProvider,
    api_key: &str,
) -> reqwest::RequestBuilder {
    if provider.is_anthropic_mode() {
        return request
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
    }

    request.header("Authorization", format!("Bearer {api_key}"))
}
