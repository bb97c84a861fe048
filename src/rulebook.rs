use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::preferences::Gender;

const EMBEDDED_RULEBOOK: &str = include_str!("../assets/rulebook.yaml");

#[derive(Debug, Clone, Deserialize)]
struct RulebookFile {
    version: String,
    preamble: String,
    rules: String,
    female_core: String,
    male_core: String,
    no_notes_placeholder: String,
    output_format: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// The style guide prepended to every prompt request, kept as a versioned asset.
#[derive(Debug, Clone)]
pub struct Rulebook {
    pub version: String,
    pub preamble: String,
    pub rules: String,
    pub female_core: String,
    pub male_core: String,
    pub no_notes_placeholder: String,
    pub output_format: String,
    pub suggestions: Vec<String>,
}

fn required(field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Rulebook field '{}' cannot be empty", field));
    }
    Ok(trimmed.to_string())
}

impl Rulebook {
    pub fn parse(raw: &str) -> Result<Self> {
        let file: RulebookFile = serde_yaml::from_str(raw)
            .map_err(|err| anyhow!("Failed to parse rulebook: {}", err))?;

        let suggestions = file
            .suggestions
            .into_iter()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();

        Ok(Rulebook {
            version: required("version", file.version)?,
            preamble: required("preamble", file.preamble)?,
            rules: required("rules", file.rules)?,
            female_core: required("female_core", file.female_core)?,
            male_core: required("male_core", file.male_core)?,
            no_notes_placeholder: required("no_notes_placeholder", file.no_notes_placeholder)?,
            output_format: required("output_format", file.output_format)?,
            suggestions,
        })
    }

    pub fn embedded() -> Result<Self> {
        Self::parse(EMBEDDED_RULEBOOK)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| anyhow!("Failed to read rulebook '{}': {}", path.display(), err))?;
        Self::parse(&raw)
    }

    /// Loads an override when one is configured, falling back to the embedded asset.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            match Self::from_path(path) {
                Ok(rulebook) => {
                    info!(
                        "Loaded rulebook v{} from {}",
                        rulebook.version,
                        path.display()
                    );
                    return Ok(rulebook);
                }
                Err(err) => warn!("{}; using embedded rulebook", err),
            }
        }
        Self::embedded()
    }

    pub fn subject_core(&self, gender: Gender) -> &str {
        match gender {
            Gender::Female => &self.female_core,
            Gender::Male => &self.male_core,
        }
    }
}
