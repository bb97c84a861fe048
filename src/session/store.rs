use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::intake::UploadedImage;
use crate::preferences::{BackgroundStyle, CameraAngle, Gender, PreferenceSet};

pub const CREDENTIAL_RECORD: &str = "prompt_craft_api_key";
pub const STATE_RECORD: &str = "prompt_craft_v1_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedImage {
    pub id: String,
    pub base64_data: String,
    pub mime_type: String,
}

/// The serialisable subset of a session, in the stored JSON shape. A `null`
/// field falls back to its default without discarding the rest of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default, deserialize_with = "null_as_default")]
    pub rules: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub angle: String,
    #[serde(
        default = "default_background_style",
        deserialize_with = "background_style_or_default"
    )]
    pub background_style: String,
    #[serde(default = "default_gender", deserialize_with = "gender_or_default")]
    pub gender: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub generated_prompt: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<PersistedImage>,
}

fn default_background_style() -> String {
    BackgroundStyle::default().as_stored().to_string()
}

fn default_gender() -> String {
    Gender::default().as_stored().to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn background_style_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_background_style))
}

fn gender_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_gender))
}

impl Default for PersistedState {
    fn default() -> Self {
        PersistedState::capture(&PreferenceSet::default(), None, None)
    }
}

impl PersistedState {
    pub fn capture(
        preferences: &PreferenceSet,
        image: Option<&UploadedImage>,
        generated_prompt: Option<&str>,
    ) -> Self {
        PersistedState {
            rules: preferences.notes.clone(),
            angle: preferences.camera_angle.as_stored().to_string(),
            background_style: preferences.background.as_stored().to_string(),
            gender: preferences.gender.as_stored().to_string(),
            generated_prompt: generated_prompt.unwrap_or_default().to_string(),
            images: image
                .map(|image| PersistedImage {
                    id: image.id.clone(),
                    base64_data: image.encoded_payload.clone(),
                    mime_type: image.mime_type.clone(),
                })
                .into_iter()
                .collect(),
        }
    }

    pub fn preferences(&self) -> PreferenceSet {
        PreferenceSet {
            notes: self.rules.clone(),
            camera_angle: CameraAngle::from_stored(&self.angle),
            background: BackgroundStyle::from_stored(&self.background_style),
            gender: Gender::from_stored(&self.gender),
        }
    }

    /// First restorable image; the active set never holds more than one.
    pub fn image(&self) -> Option<UploadedImage> {
        if self.images.len() > 1 {
            warn!(
                "Stored state holds {} images; restoring only the first",
                self.images.len()
            );
        }
        let stored = self.images.first()?;
        match UploadedImage::restore(&stored.id, &stored.base64_data, &stored.mime_type) {
            Ok(image) => Some(image),
            Err(err) => {
                warn!("Dropping unreadable stored image {}: {}", stored.id, err);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoredSession {
    pub credential: Option<Credential>,
    pub preferences: PreferenceSet,
    pub generated_prompt: Option<String>,
    pub image: Option<UploadedImage>,
}

/// Durable client-side storage: one directory holding the credential record and
/// the session record.
#[derive(Debug)]
pub struct SessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn credential_path(&self) -> PathBuf {
        self.dir.join(CREDENTIAL_RECORD)
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_RECORD)
    }

    /// Never fails: missing or malformed records leave the defaults in place.
    pub async fn load(&self) -> RestoredSession {
        let mut restored = RestoredSession {
            credential: self.load_credential().await,
            ..RestoredSession::default()
        };

        match self.load_state().await {
            Ok(Some(state)) => {
                restored.preferences = state.preferences();
                restored.image = state.image();
                if !state.generated_prompt.trim().is_empty() {
                    restored.generated_prompt = Some(state.generated_prompt.clone());
                }
                info!(
                    has_image = restored.image.is_some(),
                    has_prompt = restored.generated_prompt.is_some(),
                    "Restored session state"
                );
            }
            Ok(None) => debug!("No stored session state at {}", self.state_path().display()),
            Err(err) => warn!("Failed to restore session state: {:#}", err),
        }

        restored
    }

    async fn load_credential(&self) -> Option<Credential> {
        let path = self.credential_path();
        match fs::read_to_string(&path).await {
            Ok(raw) => {
                let credential = Credential::new(raw);
                (!credential.is_empty()).then_some(credential)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!("Failed to read stored credential {}: {}", path.display(), err);
                None
            }
        }
    }

    async fn load_state(&self) -> Result<Option<PersistedState>> {
        let path = self.state_path();
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(anyhow!("Failed to read {}: {}", path.display(), err)),
        };

        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Stored state at {} is not JSON", path.display()))?;
        if !value.is_object() {
            warn!("Ignoring foreign-shaped session record at {}", path.display());
            return Ok(None);
        }
        let state = serde_json::from_value::<PersistedState>(value)
            .with_context(|| format!("Stored state at {} has an unexpected shape", path.display()))?;
        Ok(Some(state))
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        let payload = serde_json::to_vec(state).context("Failed to serialise session state")?;
        self.write_atomic(&self.state_path(), &payload).await?;
        debug!(bytes = payload.len(), "Saved session state");
        Ok(())
    }

    /// Persistence only affects durability, so failures are logged and dropped.
    pub async fn save_best_effort(&self, state: &PersistedState) {
        if let Err(err) = self.save(state).await {
            warn!("Storage quota exceeded or error saving state: {:#}", err);
        }
    }

    /// Writes the credential immediately, or removes its record when cleared.
    pub async fn save_credential(&self, credential: Option<&Credential>) {
        let path = self.credential_path();
        let result = match credential.filter(|credential| !credential.is_empty()) {
            Some(credential) => {
                self.write_atomic(&path, credential.api_key().as_bytes())
                    .await
            }
            None => {
                let _guard = self.write_lock.lock().await;
                match fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(anyhow!("Failed to remove {}: {}", path.display(), err)),
                }
            }
        };
        if let Err(err) = result {
            warn!("Failed to persist credential: {:#}", err);
        }
    }
}
