use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing::warn;

use crate::llm::render::ResolutionTier;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub logs_dir: PathBuf,
    pub gemini_api_base: String,
    pub gemini_text_model: String,
    pub imagen_model: String,
    pub gemini_temperature: f32,
    pub state_dir: PathBuf,
    pub persist_debounce_ms: u64,
    pub rulebook_path: Option<PathBuf>,
    pub render_aspect_ratio: String,
    pub render_resolution: ResolutionTier,
    pub render_output_dir: PathBuf,
}

/// Process-wide configuration; a `.env` file in the working directory is honoured.
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    dotenvy::dotenv().ok();
    Config::load().expect("Failed to load configuration")
});

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    PathBuf::from(env_string(name, default))
}

fn env_optional_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn normalize_api_base(value: String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_GEMINI_API_BASE.to_string();
    }
    trimmed.to_string()
}

fn normalize_resolution(value: String) -> ResolutionTier {
    match ResolutionTier::parse(&value) {
        Some(tier) => tier,
        None => {
            warn!(
                "Unknown RENDER_RESOLUTION value '{}'; defaulting to 1k.",
                value
            );
            ResolutionTier::Standard
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            logs_dir: PathBuf::from("logs"),
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            gemini_text_model: "gemini-2.5-flash".to_string(),
            imagen_model: "imagen-4.0-generate-001".to_string(),
            gemini_temperature: 0.5,
            state_dir: PathBuf::from("state"),
            persist_debounce_ms: 1000,
            rulebook_path: None,
            render_aspect_ratio: "3:4".to_string(),
            render_resolution: ResolutionTier::Standard,
            render_output_dir: PathBuf::from("generated"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let defaults = Config::default();

        let gemini_temperature = env_f32("GEMINI_TEMPERATURE", defaults.gemini_temperature);
        if !(0.0..=2.0).contains(&gemini_temperature) {
            return Err(anyhow!(
                "GEMINI_TEMPERATURE must be between 0 and 2, got {}",
                gemini_temperature
            ));
        }

        Ok(Config {
            log_level: env_string("LOG_LEVEL", &defaults.log_level).to_lowercase(),
            logs_dir: env_path("LOGS_DIR", "logs"),
            gemini_api_base: normalize_api_base(env_string(
                "GEMINI_API_BASE",
                DEFAULT_GEMINI_API_BASE,
            )),
            gemini_text_model: env_string("GEMINI_TEXT_MODEL", &defaults.gemini_text_model),
            imagen_model: env_string("IMAGEN_MODEL", &defaults.imagen_model),
            gemini_temperature,
            state_dir: env_path("PROMPT_CRAFT_STATE_DIR", "state"),
            persist_debounce_ms: env_u64("PERSIST_DEBOUNCE_MS", defaults.persist_debounce_ms),
            rulebook_path: env_optional_path("RULEBOOK_PATH"),
            render_aspect_ratio: env_string("RENDER_ASPECT_RATIO", &defaults.render_aspect_ratio),
            render_resolution: normalize_resolution(env_string("RENDER_RESOLUTION", "1k")),
            render_output_dir: env_path("RENDER_OUTPUT_DIR", "generated"),
        })
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}
