//! Model identifiers and context window sizes.

/// Sentinel model name that defers the choice to the router.
pub const AUTO_MODEL: &str = "auto";
/// Concrete model used when `auto` must be resolved without the router.
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
/// Cheaper model used for classification calls and quota fallback.
pub const DEFAULT_FLASH_MODEL: &str = "gemini-2.5-flash";
/// Context window assumed for unknown models.
pub const DEFAULT_TOKEN_LIMIT: usize = 1_048_576;

/// Context window size, in tokens, for a model identifier.
pub fn token_limit(model: &str) -> usize {
    match model {
        "gemini-1.5-pro" => 2_097_152,
        "gemini-1.5-flash"
        | "gemini-2.5-pro"
        | "gemini-2.5-pro-preview-05-06"
        | "gemini-2.5-pro-preview-06-05"
        | "gemini-2.5-flash"
        | "gemini-2.5-flash-lite"
        | "gemini-2.0-flash" => 1_048_576,
        "gemini-2.0-flash-preview-image-generation" => 32_000,
        _ => DEFAULT_TOKEN_LIMIT,
    }
}

/// Whether a configured model name is the routing sentinel.
pub fn is_auto(model: &str) -> bool {
    model.eq_ignore_ascii_case(AUTO_MODEL)
}

/// Resolve a configured model to a concrete one for pre-flight size checks.
///
/// The router still makes the real decision; this only picks a window size.
pub fn resolve_model_for_limits(model: &str) -> &str {
    if is_auto(model) {
        DEFAULT_MODEL
    } else {
        model
    }
}
