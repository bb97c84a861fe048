use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::PromptCraftError;

const API_KEY_PREFIX: &str = "AIza";
const API_KEY_MIN_LENGTH: usize = 20;

/// A user-supplied Google API key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    api_key: String,
}

impl Credential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
        }
    }

    /// Builds a credential only when the key passes the syntactic check.
    pub fn parse(api_key: &str) -> Result<Self, PromptCraftError> {
        let credential = Self::new(api_key);
        if credential.is_well_formed() {
            Ok(credential)
        } else {
            Err(PromptCraftError::InvalidCredential)
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty()
    }

    pub fn is_well_formed(&self) -> bool {
        is_well_formed_key(&self.api_key)
    }

    pub fn masked(&self) -> String {
        let visible: String = self.api_key.chars().take(API_KEY_PREFIX.len()).collect();
        format!("{visible}…({} chars)", self.api_key.chars().count())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &self.masked())
            .finish()
    }
}

/// Syntactic check only; the service may still reject a well-formed key.
pub fn is_well_formed_key(api_key: &str) -> bool {
    let trimmed = api_key.trim();
    trimmed.starts_with(API_KEY_PREFIX) && trimmed.chars().count() > API_KEY_MIN_LENGTH
}

/// Key-selection flow offered by an embedding host, when it has one.
#[async_trait]
pub trait KeySelectionHost: Send + Sync {
    async fn request_key_selection(&self) -> anyhow::Result<()>;
    async fn has_selected_key(&self) -> anyhow::Result<bool>;
}

#[derive(Clone, Default)]
pub struct HostKeySelection {
    host: Option<Arc<dyn KeySelectionHost>>,
}

impl HostKeySelection {
    pub fn unavailable() -> Self {
        Self { host: None }
    }

    pub fn with_host(host: Arc<dyn KeySelectionHost>) -> Self {
        Self { host: Some(host) }
    }

    pub fn is_available(&self) -> bool {
        self.host.is_some()
    }

    /// Opens the host flow. Returns `false` when the host is absent or the flow
    /// failed, in which case the caller falls back to manual key entry.
    pub async fn request_key_selection(&self) -> bool {
        let Some(host) = &self.host else {
            return false;
        };
        match host.request_key_selection().await {
            Ok(()) => {
                info!("Host key selection completed");
                true
            }
            Err(err) => {
                warn!("Host key selection failed: {}", err);
                false
            }
        }
    }

    pub async fn has_selected_key(&self) -> bool {
        let Some(host) = &self.host else {
            return false;
        };
        match host.has_selected_key().await {
            Ok(selected) => selected,
            Err(err) => {
                warn!("Host key status check failed: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingHost;

    #[async_trait]
    impl KeySelectionHost for FailingHost {
        async fn request_key_selection(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("host dialog closed"))
        }

        async fn has_selected_key(&self) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("host bridge missing"))
        }
    }

    struct ReadyHost;

    #[async_trait]
    impl KeySelectionHost for ReadyHost {
        async fn request_key_selection(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn has_selected_key(&self) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn rejects_keys_without_prefix_or_too_short() {
        assert!(!is_well_formed_key(""));
        assert!(!is_well_formed_key("AIza"));
        assert!(!is_well_formed_key("AIza0123456789abcdef"));
        assert!(!is_well_formed_key("BIza0123456789abcdefghij"));
        assert!(!is_well_formed_key("aiza0123456789abcdefghij"));
    }

    #[test]
    fn accepts_prefixed_keys_longer_than_minimum() {
        assert!(is_well_formed_key("AIza0123456789abcdefg"));
        assert!(is_well_formed_key("  AIzaSyD-0123456789abcdefghijklmnop  "));
        assert!(Credential::parse("AIzaSyD-0123456789abcdefghijklmnop").is_ok());
    }

    #[test]
    fn parse_reports_invalid_credential() {
        assert_eq!(
            Credential::parse("sk-not-a-google-key-at-all"),
            Err(PromptCraftError::InvalidCredential)
        );
    }

    #[test]
    fn debug_output_masks_the_key() {
        let credential = Credential::new("AIzaSyD-0123456789abcdefghijklmnop");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("AIza"));
        assert!(!rendered.contains("0123456789"));
    }

    #[tokio::test]
    async fn absent_host_reports_unavailable_without_error() {
        let host = HostKeySelection::unavailable();
        assert!(!host.is_available());
        assert!(!host.request_key_selection().await);
        assert!(!host.has_selected_key().await);
    }

    #[tokio::test]
    async fn failing_host_is_treated_as_unavailable() {
        let host = HostKeySelection::with_host(Arc::new(FailingHost));
        assert!(host.is_available());
        assert!(!host.request_key_selection().await);
        assert!(!host.has_selected_key().await);
    }

    #[tokio::test]
    async fn ready_host_reports_selected_key() {
        let host = HostKeySelection::with_host(Arc::new(ReadyHost));
        assert!(host.request_key_selection().await);
        assert!(host.has_selected_key().await);
    }
}
