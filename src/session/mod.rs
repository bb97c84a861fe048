pub mod debounce;
pub mod store;

pub use debounce::DebouncedWriter;
pub use store::{PersistedImage, PersistedState, RestoredSession, SessionStore};
