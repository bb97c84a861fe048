use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::credential::{Credential, HostKeySelection};
use crate::error::PromptCraftResult;
use crate::intake::{ImageIntake, IncomingFile, IntakeSource, UploadedImage};
use crate::llm::{
    GenerationResult, GenerativeTransport, ImageRenderer, PromptRequestBuilder, RenderResult,
    ResolutionTier,
};
use crate::preferences::{suggestion_window, BackgroundStyle, CameraAngle, Gender, PreferenceSet};
use crate::rulebook::Rulebook;
use crate::session::{DebouncedWriter, PersistedState, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationStatus {
    #[default]
    Idle,
    Generating,
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub aspect_ratio: String,
    pub tier: ResolutionTier,
    pub output_dir: PathBuf,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: crate::llm::render::DEFAULT_ASPECT_RATIO.to_string(),
            tier: ResolutionTier::Standard,
            output_dir: PathBuf::from("generated"),
        }
    }
}

impl RenderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            aspect_ratio: config.render_aspect_ratio.clone(),
            tier: config.render_resolution,
            output_dir: config.render_output_dir.clone(),
        }
    }
}

/// One prompt request captured at the moment it was started.
pub struct PromptTicket {
    seq: u64,
    builder: PromptRequestBuilder,
    credential: Credential,
    image: Option<UploadedImage>,
    preferences: PreferenceSet,
}

impl PromptTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub async fn run(&self) -> PromptCraftResult<GenerationResult> {
        self.builder
            .build_and_generate(&self.credential, self.image.as_ref(), &self.preferences)
            .await
    }
}

/// One render request captured at the moment it was started.
pub struct RenderTicket {
    seq: u64,
    renderer: ImageRenderer,
    credential: Option<Credential>,
    prompt: String,
    aspect_ratio: String,
    tier: ResolutionTier,
}

impl RenderTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub async fn run(&self) -> PromptCraftResult<Option<RenderResult>> {
        self.renderer
            .render_image(
                self.credential.as_ref(),
                &self.prompt,
                &self.aspect_ratio,
                self.tier,
            )
            .await
    }
}

struct Persistence {
    store: Arc<SessionStore>,
    writer: DebouncedWriter,
}

/// Headless owner of the session the presentation layer renders and mutates.
pub struct Workspace {
    credential: Option<Credential>,
    intake: ImageIntake,
    preferences: PreferenceSet,
    generation: Option<GenerationResult>,
    render: Option<RenderResult>,
    status: GenerationStatus,
    error_message: Option<String>,
    render_error: Option<String>,
    rendering: bool,
    suggestion_refresh: u64,
    host: HostKeySelection,
    prompt_builder: PromptRequestBuilder,
    renderer: ImageRenderer,
    render_options: RenderOptions,
    persistence: Option<Persistence>,
    loaded: bool,
    last_ticket: u64,
    latest_generation: u64,
    latest_render: u64,
}

impl Workspace {
    pub fn new(
        prompt_builder: PromptRequestBuilder,
        renderer: ImageRenderer,
        render_options: RenderOptions,
    ) -> Self {
        Self {
            credential: None,
            intake: ImageIntake::new(),
            preferences: PreferenceSet::default(),
            generation: None,
            render: None,
            status: GenerationStatus::Idle,
            error_message: None,
            render_error: None,
            rendering: false,
            suggestion_refresh: 0,
            host: HostKeySelection::unavailable(),
            prompt_builder,
            renderer,
            render_options,
            persistence: None,
            loaded: false,
            last_ticket: 0,
            latest_generation: 0,
            latest_render: 0,
        }
    }

    /// Builds a workspace from configuration and restores the stored session.
    /// Must be called inside a tokio runtime.
    pub async fn open(config: &Config, transport: Arc<dyn GenerativeTransport>) -> Result<Self> {
        let rulebook = Rulebook::load(config.rulebook_path.as_deref())
            .context("Failed to load the rulebook")?;
        let prompt_builder =
            PromptRequestBuilder::from_config(Arc::clone(&transport), Arc::new(rulebook), config);
        let renderer = ImageRenderer::from_config(transport, config);
        let store = Arc::new(SessionStore::new(config.state_dir.clone()));

        let mut workspace = Self::new(prompt_builder, renderer, RenderOptions::from_config(config))
            .with_persistence(store, config.persist_debounce());
        workspace.load().await;
        Ok(workspace)
    }

    pub fn with_persistence(mut self, store: Arc<SessionStore>, debounce: std::time::Duration) -> Self {
        let writer = DebouncedWriter::spawn(Arc::clone(&store), debounce);
        self.persistence = Some(Persistence { store, writer });
        self
    }

    pub fn with_host(mut self, host: HostKeySelection) -> Self {
        self.host = host;
        self
    }

    /// Restores the stored session and opens the write gate.
    pub async fn load(&mut self) {
        if let Some(persistence) = &self.persistence {
            let restored = persistence.store.load().await;
            self.credential = restored.credential;
            self.preferences = restored.preferences;
            self.generation = restored.generated_prompt.map(GenerationResult::new);
            match restored.image {
                Some(image) => self.intake.restore(image),
                None => self.intake.clear(),
            }
        }
        self.loaded = true;
        debug!("Workspace load completed");
    }

    /// Flushes pending state and stops the background writer.
    pub async fn shutdown(self) {
        if let Some(persistence) = self.persistence {
            persistence.writer.shutdown().await;
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn active_image(&self) -> Option<&UploadedImage> {
        self.intake.active()
    }

    pub fn image_updates(&self) -> watch::Receiver<Option<UploadedImage>> {
        self.intake.subscribe()
    }

    pub fn preferences(&self) -> &PreferenceSet {
        &self.preferences
    }

    pub fn generation(&self) -> Option<&GenerationResult> {
        self.generation.as_ref()
    }

    pub fn render(&self) -> Option<&RenderResult> {
        self.render.as_ref()
    }

    pub fn status(&self) -> GenerationStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn render_error(&self) -> Option<&str> {
        self.render_error.as_deref()
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn can_generate(&self) -> bool {
        self.credential
            .as_ref()
            .map(Credential::is_well_formed)
            .unwrap_or(false)
            && self.intake.active().is_some()
            && self.status != GenerationStatus::Generating
    }

    pub fn host_key_selection_available(&self) -> bool {
        self.host.is_available()
    }

    /// Runs the host flow; `false` means the caller should ask for a key directly.
    pub async fn select_key_via_host(&self) -> bool {
        if !self.host.request_key_selection().await {
            return false;
        }
        self.host.has_selected_key().await
    }

    pub async fn set_credential(&mut self, api_key: &str) {
        let credential = Credential::new(api_key);
        if credential.is_empty() {
            self.clear_credential().await;
            return;
        }
        info!(credential = ?credential, "Credential updated");
        self.credential = Some(credential);
        self.error_message = None;
        self.persist_credential().await;
    }

    pub async fn clear_credential(&mut self) {
        self.credential = None;
        self.persist_credential().await;
        info!("Credential cleared");
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.preferences.set_notes(notes);
        self.preferences_changed();
    }

    pub fn set_camera_angle(&mut self, angle: CameraAngle) {
        self.preferences.set_camera_angle(angle);
        self.preferences_changed();
    }

    pub fn set_background(&mut self, background: BackgroundStyle) {
        self.preferences.set_background(background);
        self.preferences_changed();
    }

    pub fn set_gender(&mut self, gender: Gender) {
        self.preferences.set_gender(gender);
        self.preferences_changed();
    }

    pub fn append_suggestion(&mut self, suggestion: &str) {
        self.preferences.append_suggestion(suggestion);
        self.preferences_changed();
    }

    pub fn suggestions(&self, count: usize) -> Vec<String> {
        suggestion_window(
            &self.prompt_builder.rulebook().suggestions,
            self.suggestion_refresh,
            count,
        )
    }

    /// Feeds picker, drop and paste input through the single-image intake.
    /// Returns `true` when a new image became active.
    pub fn accept_images(
        &mut self,
        source: IntakeSource,
        files: Vec<IncomingFile>,
    ) -> PromptCraftResult<bool> {
        match self.intake.accept(source, files) {
            Ok(Some(_)) => {
                self.error_message = None;
                self.schedule_persist();
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => {
                self.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Removing the image discards everything derived from it.
    pub fn remove_image(&mut self, id: &str) -> bool {
        if !self.intake.remove(id) {
            return false;
        }
        self.generation = None;
        self.render = None;
        self.error_message = None;
        self.render_error = None;
        self.status = GenerationStatus::Idle;
        self.rendering = false;
        self.invalidate_outstanding();
        self.schedule_persist();
        true
    }

    pub fn edit_prompt(&mut self, prompt_text: impl Into<String>) {
        let prompt_text = prompt_text.into();
        match &mut self.generation {
            Some(generation) => generation.edit(prompt_text),
            None if !prompt_text.trim().is_empty() => {
                self.generation = Some(GenerationResult::new(prompt_text));
            }
            None => {}
        }
        self.schedule_persist();
    }

    pub fn begin_generation(&mut self) -> PromptTicket {
        let seq = self.next_ticket();
        self.latest_generation = seq;
        self.status = GenerationStatus::Generating;
        self.error_message = None;
        debug!(seq, "Prompt generation started");
        PromptTicket {
            seq,
            builder: self.prompt_builder.clone(),
            credential: self.credential.clone().unwrap_or_else(|| Credential::new("")),
            image: self.intake.active().cloned(),
            preferences: self.preferences.clone(),
        }
    }

    /// Applies a completed generation. Returns `false` when a newer request superseded it.
    pub fn apply_generation(
        &mut self,
        seq: u64,
        result: PromptCraftResult<GenerationResult>,
    ) -> bool {
        if seq != self.latest_generation {
            debug!(seq, latest = self.latest_generation, "Discarding stale prompt response");
            return false;
        }
        match result {
            Ok(generation) => {
                self.generation = Some(generation);
                self.status = GenerationStatus::Success;
                self.suggestion_refresh = self.suggestion_refresh.wrapping_add(1);
                self.schedule_persist();
            }
            Err(err) => {
                self.status = GenerationStatus::Error;
                self.error_message = Some(err.to_string());
            }
        }
        true
    }

    pub async fn generate_prompt(&mut self) -> PromptCraftResult<GenerationResult> {
        let ticket = self.begin_generation();
        let result = ticket.run().await;
        self.apply_generation(ticket.seq(), result.clone());
        result
    }

    /// Discards the previous render and captures the current prompt.
    pub fn begin_render(&mut self) -> RenderTicket {
        let seq = self.next_ticket();
        self.latest_render = seq;
        self.render = None;
        self.render_error = None;
        self.rendering = true;
        RenderTicket {
            seq,
            renderer: self.renderer.clone(),
            credential: self.credential.clone(),
            prompt: self
                .generation
                .as_ref()
                .map(|generation| generation.prompt_text.clone())
                .unwrap_or_default(),
            aspect_ratio: self.render_options.aspect_ratio.clone(),
            tier: self.render_options.tier,
        }
    }

    pub fn apply_render(
        &mut self,
        seq: u64,
        result: PromptCraftResult<Option<RenderResult>>,
    ) -> bool {
        if seq != self.latest_render {
            debug!(seq, latest = self.latest_render, "Discarding stale render response");
            return false;
        }
        self.rendering = false;
        match result {
            Ok(render) => self.render = render,
            Err(err) => self.render_error = Some(err.to_string()),
        }
        true
    }

    pub async fn render_image(&mut self) -> PromptCraftResult<Option<RenderResult>> {
        let ticket = self.begin_render();
        let result = ticket.run().await;
        self.apply_render(ticket.seq(), result.clone());
        result
    }

    pub async fn save_render(&self) -> Result<Option<PathBuf>> {
        match &self.render {
            Some(render) => Ok(Some(render.save_to_dir(&self.render_options.output_dir).await?)),
            None => Ok(None),
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        PersistedState::capture(
            &self.preferences,
            self.intake.active(),
            self.generation
                .as_ref()
                .map(|generation| generation.prompt_text.as_str()),
        )
    }

    fn next_ticket(&mut self) -> u64 {
        self.last_ticket += 1;
        self.last_ticket
    }

    fn invalidate_outstanding(&mut self) {
        let seq = self.next_ticket();
        self.latest_generation = seq;
        self.latest_render = seq;
    }

    fn preferences_changed(&mut self) {
        self.error_message = None;
        self.schedule_persist();
    }

    fn schedule_persist(&self) {
        if !self.loaded {
            return;
        }
        if let Some(persistence) = &self.persistence {
            persistence.writer.schedule(self.snapshot());
        }
    }

    async fn persist_credential(&self) {
        if !self.loaded {
            warn!("Credential changed before load completed; not persisted");
            return;
        }
        if let Some(persistence) = &self.persistence {
            persistence
                .store
                .save_credential(self.credential.as_ref())
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::PromptCraftError;
    use crate::intake::tests::png_bytes;
    use crate::llm::testing::RecordingTransport;
    use crate::session::store::{CREDENTIAL_RECORD, STATE_RECORD};

    const KEY: &str = "AIzaSyD-0123456789abcdefghijklmnop";

    async fn workspace(transport: Arc<RecordingTransport>) -> Workspace {
        let rulebook = Arc::new(Rulebook::embedded().unwrap());
        let builder = PromptRequestBuilder::new(transport.clone(), rulebook, "gemini-2.5-flash", 0.5);
        let renderer = ImageRenderer::new(transport, "imagen-4.0-generate-001");
        let mut workspace = Workspace::new(builder, renderer, RenderOptions::default());
        workspace.load().await;
        workspace
    }

    fn png_file() -> IncomingFile {
        IncomingFile::new(Some("look.png".to_string()), "image/png", png_bytes())
    }

    #[tokio::test]
    async fn can_generate_requires_key_and_image() {
        let mut ws = workspace(Arc::new(RecordingTransport::new())).await;
        assert!(!ws.can_generate());

        ws.set_credential("short").await;
        ws.accept_images(IntakeSource::FilePicker, vec![png_file()]).unwrap();
        assert!(!ws.can_generate());

        ws.set_credential(KEY).await;
        assert!(ws.can_generate());

        ws.begin_generation();
        assert!(!ws.can_generate());
    }

    #[tokio::test]
    async fn setters_clear_the_error_message() {
        let mut ws = workspace(Arc::new(RecordingTransport::new())).await;
        ws.accept_images(IntakeSource::FilePicker, vec![png_file()]).unwrap();
        let err = ws
            .accept_images(IntakeSource::DragDrop, vec![png_file()])
            .unwrap_err();
        assert_eq!(err, PromptCraftError::TooManyImages);
        assert!(ws.error_message().is_some());

        ws.set_background(BackgroundStyle::Gradient);
        assert!(ws.error_message().is_none());
        assert_eq!(ws.preferences().background, BackgroundStyle::Gradient);
    }

    #[tokio::test]
    async fn generation_without_image_reports_error() {
        let transport = Arc::new(RecordingTransport::new());
        let mut ws = workspace(transport.clone()).await;
        ws.set_credential(KEY).await;

        let err = ws.generate_prompt().await.unwrap_err();

        assert_eq!(err, PromptCraftError::NoImageProvided);
        assert_eq!(ws.status(), GenerationStatus::Error);
        assert_eq!(ws.error_message(), Some(err.to_string().as_str()));
        assert_eq!(transport.text_call_count(), 0);
    }

    #[tokio::test]
    async fn successful_generation_rotates_suggestions() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_text("  A full-body fashion photo.  ");
        let mut ws = workspace(transport.clone()).await;
        ws.set_credential(KEY).await;
        ws.accept_images(IntakeSource::Clipboard, vec![png_file()]).unwrap();
        let before = ws.suggestions(4);

        let generation = ws.generate_prompt().await.unwrap();

        assert_eq!(generation.prompt_text, "A full-body fashion photo.");
        assert_eq!(ws.status(), GenerationStatus::Success);
        assert_ne!(ws.suggestions(4), before);
        assert_eq!(transport.last_text_call().unwrap().api_key, KEY);
    }

    #[tokio::test]
    async fn stale_generation_is_discarded() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_text("older prompt");
        transport.push_text("newer prompt");
        let mut ws = workspace(transport).await;
        ws.set_credential(KEY).await;
        ws.accept_images(IntakeSource::FilePicker, vec![png_file()]).unwrap();

        let first = ws.begin_generation();
        let second = ws.begin_generation();
        let first_result = first.run().await;
        let second_result = second.run().await;

        assert!(ws.apply_generation(second.seq(), second_result));
        assert!(!ws.apply_generation(first.seq(), first_result));
        assert_eq!(ws.generation().unwrap().prompt_text, "newer prompt");
        assert_eq!(ws.status(), GenerationStatus::Success);
    }

    #[tokio::test]
    async fn removing_image_resets_derived_state() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_text("prompt");
        let mut ws = workspace(transport).await;
        ws.set_credential(KEY).await;
        ws.accept_images(IntakeSource::FilePicker, vec![png_file()]).unwrap();
        ws.generate_prompt().await.unwrap();
        let pending = ws.begin_generation();

        let id = ws.active_image().unwrap().id.clone();
        assert!(!ws.remove_image("other"));
        assert!(ws.remove_image(&id));

        assert!(ws.active_image().is_none());
        assert!(ws.generation().is_none());
        assert!(ws.render().is_none());
        assert_eq!(ws.status(), GenerationStatus::Idle);
        assert!(!ws.apply_generation(pending.seq(), Ok(GenerationResult::new("late"))));
        assert!(ws.generation().is_none());
    }

    #[tokio::test]
    async fn render_discards_previous_result() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_image("AQID");
        transport.push_image_error("500 Internal error");
        let mut ws = workspace(transport.clone()).await;
        ws.set_credential(KEY).await;
        ws.edit_prompt("A model on a runway");

        let first = ws.render_image().await.unwrap().unwrap();
        assert_eq!(first.bytes, vec![1, 2, 3]);
        assert!(ws.render().is_some());

        let err = ws.render_image().await.unwrap_err();
        assert!(matches!(err, PromptCraftError::UpstreamError(_)));
        assert!(ws.render().is_none());
        assert!(ws.render_error().is_some());
        assert!(!ws.is_rendering());

        let payload = transport.last_image_call().unwrap().payload;
        assert_eq!(payload["parameters"]["aspectRatio"], "3:4");
    }

    #[tokio::test]
    async fn render_without_prompt_makes_no_request() {
        let transport = Arc::new(RecordingTransport::new());
        let mut ws = workspace(transport.clone()).await;
        ws.set_credential(KEY).await;

        assert_eq!(ws.render_image().await.unwrap(), None);
        assert_eq!(transport.image_call_count(), 0);
    }

    #[tokio::test]
    async fn missing_host_falls_back_to_manual_entry() {
        let ws = workspace(Arc::new(RecordingTransport::new())).await;
        assert!(!ws.host_key_selection_available());
        assert!(!ws.select_key_via_host().await);
    }

    #[tokio::test(start_paused = true)]
    async fn session_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(SessionStore::new(dir.path()));

        let mut ws = workspace(transport.clone())
            .await
            .with_persistence(Arc::clone(&store), Duration::from_millis(1000));
        ws.set_credential(KEY).await;
        assert!(dir.path().join(CREDENTIAL_RECORD).exists());
        ws.accept_images(IntakeSource::FilePicker, vec![png_file()]).unwrap();
        ws.set_gender(Gender::Male);
        ws.set_notes("- Linen suit");
        ws.edit_prompt("Edited prompt");
        let image = ws.active_image().cloned().unwrap();
        ws.shutdown().await;
        assert!(dir.path().join(STATE_RECORD).exists());

        let mut reopened = Workspace::new(
            PromptRequestBuilder::new(
                transport.clone(),
                Arc::new(Rulebook::embedded().unwrap()),
                "gemini-2.5-flash",
                0.5,
            ),
            ImageRenderer::new(transport, "imagen-4.0-generate-001"),
            RenderOptions::default(),
        )
        .with_persistence(store, Duration::from_millis(1000));
        reopened.load().await;

        assert_eq!(reopened.credential().unwrap().api_key(), KEY);
        assert_eq!(reopened.preferences().gender, Gender::Male);
        assert_eq!(reopened.preferences().notes, "- Linen suit");
        assert_eq!(reopened.generation().unwrap().prompt_text, "Edited prompt");
        assert_eq!(reopened.active_image().unwrap().encoded_payload, image.encoded_payload);
        reopened.shutdown().await;
    }

    #[tokio::test]
    async fn writes_wait_for_load() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let rulebook = Arc::new(Rulebook::embedded().unwrap());
        let mut ws = Workspace::new(
            PromptRequestBuilder::new(transport.clone(), rulebook, "m", 0.5),
            ImageRenderer::new(transport, "i"),
            RenderOptions::default(),
        )
        .with_persistence(Arc::new(SessionStore::new(dir.path())), Duration::from_millis(10));

        ws.set_credential(KEY).await;
        ws.set_notes("early");
        ws.shutdown().await;

        assert!(!dir.path().join(CREDENTIAL_RECORD).exists());
        assert!(!dir.path().join(STATE_RECORD).exists());
    }

    #[tokio::test]
    async fn unwritable_storage_does_not_break_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let store = Arc::new(SessionStore::new(blocker.join("state")));

        let mut ws = workspace(Arc::new(RecordingTransport::new()))
            .await
            .with_persistence(store, Duration::from_millis(10));
        ws.set_credential(KEY).await;
        ws.accept_images(IntakeSource::FilePicker, vec![png_file()]).unwrap();
        ws.set_notes("- Denim jacket");
        ws.set_camera_angle(CameraAngle::LowAngle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(ws.preferences().notes, "- Denim jacket");
        assert_eq!(ws.preferences().camera_angle, CameraAngle::LowAngle);
        assert!(ws.error_message().is_none());
        assert!(ws.can_generate());
        ws.shutdown().await;
    }
}
