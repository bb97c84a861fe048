use crate::error::PromptCraftError;

const TEXT_AUTH_MARKERS: [&str; 3] = ["403", "API key", "API_KEY_INVALID"];
const IMAGE_AUTH_MARKERS: [&str; 2] = ["403", "API key"];
const SAFETY_MARKER: &str = "SAFETY";

pub const TEXT_AUTH_MESSAGE: &str = "Authentication failed: the API key is incorrect or does not have access to this model. Please check the key and try again.";
pub const IMAGE_AUTH_MESSAGE: &str = "API access was denied. Please check your API key.";
pub const TEXT_SAFETY_MESSAGE: &str =
    "The content was blocked by the safety filter. Please try a different image.";
pub const IMAGE_SAFETY_MESSAGE: &str =
    "The image was blocked by Google's safety filter. Please try again with a different prompt.";

fn contains_any(message: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| message.contains(marker))
}

pub fn is_text_auth_error(message: &str) -> bool {
    contains_any(message, &TEXT_AUTH_MARKERS)
}

pub fn is_image_auth_error(message: &str) -> bool {
    contains_any(message, &IMAGE_AUTH_MARKERS)
}

pub fn is_safety_error(message: &str) -> bool {
    message.contains(SAFETY_MARKER)
}

/// Maps a text-generation transport failure into the public taxonomy.
pub fn classify_text_error(err: &anyhow::Error) -> PromptCraftError {
    let message = format!("{err:#}");
    if is_text_auth_error(&message) {
        PromptCraftError::AuthenticationFailed(TEXT_AUTH_MESSAGE.to_string())
    } else {
        PromptCraftError::UpstreamError(message)
    }
}

/// Maps an image-generation transport failure into the public taxonomy.
pub fn classify_image_error(err: &anyhow::Error) -> PromptCraftError {
    let message = format!("{err:#}");
    if is_image_auth_error(&message) {
        PromptCraftError::AuthenticationFailed(IMAGE_AUTH_MESSAGE.to_string())
    } else if is_safety_error(&message) {
        PromptCraftError::SafetyBlocked(IMAGE_SAFETY_MESSAGE.to_string())
    } else {
        PromptCraftError::UpstreamError(format!("Image generation failed: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn text_errors_with_auth_markers_become_authentication_failed() {
        for message in [
            "Gemini request failed with status 403 Forbidden: permission denied",
            "Gemini request failed with status 400 Bad Request: API key not valid.",
            "status 400: API_KEY_INVALID",
        ] {
            assert_eq!(
                classify_text_error(&anyhow!(message.to_string())),
                PromptCraftError::AuthenticationFailed(TEXT_AUTH_MESSAGE.to_string())
            );
        }
    }

    #[test]
    fn other_text_errors_keep_original_message() {
        let err = anyhow!("Gemini request failed with status 500 Internal Server Error: boom");
        assert_eq!(
            classify_text_error(&err),
            PromptCraftError::UpstreamError(
                "Gemini request failed with status 500 Internal Server Error: boom".to_string()
            )
        );
    }

    #[test]
    fn image_errors_are_classified_in_order() {
        assert!(matches!(
            classify_image_error(&anyhow!("status 403 Forbidden")),
            PromptCraftError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            classify_image_error(&anyhow!("prompt rejected: SAFETY")),
            PromptCraftError::SafetyBlocked(_)
        ));
        assert_eq!(
            classify_image_error(&anyhow!("connection reset")),
            PromptCraftError::UpstreamError("Image generation failed: connection reset".to_string())
        );
    }

    #[test]
    fn image_auth_does_not_use_text_only_marker() {
        assert!(!is_image_auth_error("API_KEY_INVALID"));
        assert!(is_text_auth_error("API_KEY_INVALID"));
    }
}
