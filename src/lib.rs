//! Fashion-photo prompt assistant: turns a reference image and a few preferences
//! into a text-to-image prompt, and optionally renders it.

pub mod config;
pub mod credential;
pub mod error;
pub mod intake;
pub mod llm;
pub mod preferences;
pub mod rulebook;
pub mod session;
pub mod utils;
pub mod workspace;

pub use config::{Config, CONFIG};
pub use credential::{Credential, HostKeySelection, KeySelectionHost};
pub use error::{PromptCraftError, PromptCraftResult};
pub use intake::{ImageIntake, IncomingFile, IntakeSource, UploadedImage};
pub use llm::{
    GenerationResult, GenerativeTransport, HttpGeminiTransport, ImageRenderer,
    PromptRequestBuilder, RenderResult, ResolutionTier,
};
pub use preferences::{BackgroundStyle, CameraAngle, Gender, PreferenceSet};
pub use rulebook::Rulebook;
pub use session::{DebouncedWriter, PersistedState, SessionStore};
pub use workspace::{GenerationStatus, RenderOptions, Workspace};
