//! SPDX-License-Identifier: GPL-3.0-or-later

//! A small capability registry for the two external-model parameter
//! families that accept different names for the output-length cap.
//! Resolved once at classifier/narrative-client construction rather than
//! scattering a conditional at every call site.

/// The JSON field name an external model expects for its output-length
/// cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenParamName {
    MaxTokens,
    MaxCompletionTokens,
}

impl TokenParamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenParamName::MaxTokens => "max_tokens",
            TokenParamName::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// Model name prefixes known to require `max_completion_tokens` instead
/// of the default `max_tokens`. Unrecognized prefixes default to
/// `max_tokens`.
const COMPLETION_TOKEN_PREFIXES: &[&str] = &["o1", "o3", "gpt-5"];

/// Resolves the token-limit parameter name for a configured model name.
pub fn resolve_token_param(model_name: &str) -> TokenParamName {
    let lower = model_name.to_ascii_lowercase();
    if COMPLETION_TOKEN_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        TokenParamName::MaxCompletionTokens
    } else {
        TokenParamName::MaxTokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prefix_selects_completion_tokens() {
        assert_eq!(resolve_token_param("o1-mini"), TokenParamName::MaxCompletionTokens);
        assert_eq!(resolve_token_param("gpt-5-vision"), TokenParamName::MaxCompletionTokens);
    }

    #[test]
    fn unknown_prefix_defaults_to_max_tokens() {
        assert_eq!(resolve_token_param("vision-mini-2"), TokenParamName::MaxTokens);
        assert_eq!(resolve_token_param("claude-vision"), TokenParamName::MaxTokens);
    }
}
