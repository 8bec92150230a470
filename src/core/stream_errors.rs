use std::fmt;

/// Broad category of a failed completion request, derived from the
/// provider's error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Quota,
    RateLimit,
    ModelUnavailable,
    Network,
    ContextTooLong,
    ContentFiltered,
    ServerError,
    Unknown,
}

const CLASSIFIERS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Auth,
        &["bearer", "authentication", "unauthorized", "401"],
    ),
    (
        ErrorKind::Quota,
        &["quota", "billing", "insufficient", "exceeded"],
    ),
    (
        ErrorKind::RateLimit,
        &["rate limit", "429", "too many requests"],
    ),
    (
        ErrorKind::ModelUnavailable,
        &["model not found", "invalid model", "model unavailable"],
    ),
    (
        ErrorKind::Network,
        &["connection", "network", "timeout", "dns", "unreachable"],
    ),
    (
        ErrorKind::ContextTooLong,
        &[
            "context length",
            "token limit",
            "max tokens",
            "context_length_exceeded",
        ],
    ),
    (
        ErrorKind::ContentFiltered,
        &["content policy", "safety", "filtered", "blocked"],
    ),
    (
        ErrorKind::ServerError,
        &[
            "500",
            "502",
            "503",
            "504",
            "internal server",
            "bad gateway",
            "service unavailable",
        ],
    ),
];

impl ErrorKind {
    /// First matching category wins, so the table order matters.
    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        CLASSIFIERS
            .iter()
            .find(|(_, needles)| needles.iter().any(|needle| lower.contains(needle)))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Quota => "quota",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::ModelUnavailable => "model-unavailable",
            ErrorKind::Network => "network",
            ErrorKind::ContextTooLong => "context-too-long",
            ErrorKind::ContentFiltered => "content-filtered",
            ErrorKind::ServerError => "server-error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// A provider failure classified once, where the session observed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub raw: String,
    pub model: String,
}

impl ClassifiedError {
    pub fn classify(raw: impl Into<String>, model: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            kind: ErrorKind::classify(&raw),
            raw,
            model: model.into(),
        }
    }

    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Auth => "API authentication failed. Please check your API key in the settings and ensure it's valid and has sufficient credits.".to_string(),
            ErrorKind::Quota => "You've exceeded your API quota or have insufficient credits. Please check your API account billing and usage.".to_string(),
            ErrorKind::RateLimit => "You've hit the API rate limit. Please wait a moment before sending another message.".to_string(),
            ErrorKind::ModelUnavailable => format!(
                "The model '{}' is not available or accessible with your API key. Try selecting a different model.",
                self.model
            ),
            ErrorKind::Network => "Connection error. Please check your connection and API keys, then try again.".to_string(),
            ErrorKind::ContextTooLong => "The conversation is too long for this model. Try starting a new chat.".to_string(),
            ErrorKind::ContentFiltered => "Your message was blocked by content safety filters. Please try rephrasing your request.".to_string(),
            ErrorKind::ServerError => "The AI service is temporarily unavailable. Please try again in a few moments.".to_string(),
            ErrorKind::Unknown => self.raw.trim().to_string(),
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_message())
    }
}

impl std::error::Error for ClassifiedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_provider_failures() {
        let cases = [
            ("HTTP 401 Unauthorized: Incorrect API key provided", ErrorKind::Auth),
            ("You have insufficient_quota for this request", ErrorKind::Quota),
            ("HTTP 429 Too Many Requests: slow down", ErrorKind::RateLimit),
            ("The model `gpt-9` model not found", ErrorKind::ModelUnavailable),
            ("Connection error: dns error: failed to lookup address", ErrorKind::Network),
            ("This model's maximum context length is 8192 tokens", ErrorKind::ContextTooLong),
            ("Request rejected by safety system", ErrorKind::ContentFiltered),
            ("HTTP 502 Bad Gateway", ErrorKind::ServerError),
            ("something odd happened", ErrorKind::Unknown),
        ];
        for (raw, expected) in cases {
            assert_eq!(ErrorKind::classify(raw), expected, "{raw}");
        }
    }

    #[test]
    fn earlier_categories_take_precedence() {
        // "exceeded" is a quota signal and is checked before rate limiting.
        assert_eq!(
            ErrorKind::classify("Rate limit exceeded"),
            ErrorKind::Quota
        );
    }

    #[test]
    fn unknown_errors_surface_the_raw_text() {
        let error = ClassifiedError::classify("  weird failure \n", "m");
        assert_eq!(error.kind, ErrorKind::Unknown);
        assert_eq!(error.user_message(), "weird failure");
    }

    #[test]
    fn model_guidance_names_the_model() {
        let error = ClassifiedError::classify("invalid model requested", "gpt-x");
        assert!(error.user_message().contains("'gpt-x'"));
    }
}
