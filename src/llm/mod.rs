pub mod classify;
pub mod gemini;
pub mod prompt;
pub mod render;
#[cfg(test)]
pub(crate) mod testing;

pub use gemini::{GenerativeTransport, HttpGeminiTransport};
pub use prompt::{GenerationResult, PromptRequestBuilder};
pub use render::{sanitize_aspect_ratio, ImageRenderer, RenderResult, ResolutionTier};
