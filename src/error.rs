/// Errors surfaced to the presentation layer. `Display` is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptCraftError {
    #[error("Invalid API key. Enter a Google API key that starts with 'AIza'.")]
    InvalidCredential,
    #[error("Please upload a reference image first.")]
    NoImageProvided,
    #[error("Only one image can be uploaded. Remove the current image before adding a new one.")]
    TooManyImages,
    #[error("Failed to read image: {0}")]
    ImageReadError(String),
    #[error("{0}")]
    SafetyBlocked(String),
    #[error("No response was received from the AI model.")]
    EmptyResponse,
    #[error("No image was returned by the image model.")]
    NoImageReturned,
    #[error("{0}")]
    AuthenticationFailed(String),
    #[error("{0}")]
    UpstreamError(String),
}

impl PromptCraftError {
    /// Errors the image intake resolves in place without touching stored state.
    pub fn is_intake_local(&self) -> bool {
        matches!(
            self,
            PromptCraftError::TooManyImages | PromptCraftError::ImageReadError(_)
        )
    }
}

pub type PromptCraftResult<T> = Result<T, PromptCraftError>;
