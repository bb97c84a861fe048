use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraAngle {
    #[default]
    Default,
    LowAngle,
    HighAngle,
    EyeLevel,
}

impl CameraAngle {
    pub const ALL: [CameraAngle; 4] = [
        CameraAngle::Default,
        CameraAngle::LowAngle,
        CameraAngle::HighAngle,
        CameraAngle::EyeLevel,
    ];

    /// Value written to storage; the default angle is stored as an empty string.
    pub fn as_stored(self) -> &'static str {
        match self {
            CameraAngle::Default => "",
            CameraAngle::LowAngle => "low-angle",
            CameraAngle::HighAngle => "high-angle",
            CameraAngle::EyeLevel => "eye-level",
        }
    }

    pub fn from_stored(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "default" => CameraAngle::Default,
            "low-angle" => CameraAngle::LowAngle,
            "high-angle" => CameraAngle::HighAngle,
            "eye-level" => CameraAngle::EyeLevel,
            other => {
                warn!("Unknown camera angle '{}'; using default.", other);
                CameraAngle::Default
            }
        }
    }

    /// Text sent to the model. An unset angle resolves to eye-level.
    pub fn instruction_label(self) -> &'static str {
        match self {
            CameraAngle::Default => "eye-level",
            other => other.as_stored(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackgroundStyle {
    #[default]
    CleanWhite,
    Gradient,
    Studio,
}

impl BackgroundStyle {
    pub const ALL: [BackgroundStyle; 3] = [
        BackgroundStyle::CleanWhite,
        BackgroundStyle::Gradient,
        BackgroundStyle::Studio,
    ];

    pub fn as_stored(self) -> &'static str {
        match self {
            BackgroundStyle::CleanWhite => "clean-white",
            BackgroundStyle::Gradient => "gradient",
            BackgroundStyle::Studio => "studio",
        }
    }

    /// Unrecognised stored values fall back to the clean white backdrop.
    pub fn from_stored(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "clean-white" => BackgroundStyle::CleanWhite,
            "gradient" => BackgroundStyle::Gradient,
            "studio" => BackgroundStyle::Studio,
            other => {
                warn!("Unknown background style '{}'; using clean-white.", other);
                BackgroundStyle::CleanWhite
            }
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            BackgroundStyle::CleanWhite => "a clean white studio background",
            BackgroundStyle::Gradient => "a soft abstract gradient studio background",
            BackgroundStyle::Studio => "a professional studio background with subtle props",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gender {
    #[default]
    Female,
    Male,
}

impl Gender {
    pub fn as_stored(self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
        }
    }

    pub fn from_stored(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Gender::Male,
            "female" | "" => Gender::Female,
            other => {
                warn!("Unknown gender '{}'; using female.", other);
                Gender::Female
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Gender::Female => "Female",
            Gender::Male => "Male",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreferenceSet {
    pub notes: String,
    pub camera_angle: CameraAngle,
    pub background: BackgroundStyle,
    pub gender: Gender,
}

impl PreferenceSet {
    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
    }

    pub fn set_camera_angle(&mut self, angle: CameraAngle) {
        self.camera_angle = angle;
    }

    pub fn set_background(&mut self, background: BackgroundStyle) {
        self.background = background;
    }

    pub fn set_gender(&mut self, gender: Gender) {
        self.gender = gender;
    }

    /// Appends a suggestion chip to the notes as a bullet line.
    pub fn append_suggestion(&mut self, suggestion: &str) {
        let prefix = if self.notes.trim().is_empty() {
            "- "
        } else {
            "\n- "
        };
        self.notes.push_str(prefix);
        self.notes.push_str(suggestion.trim());
    }
}

/// Rotating window over the suggestion list; `refresh` advances it by one page.
pub fn suggestion_window(suggestions: &[String], refresh: u64, count: usize) -> Vec<String> {
    if suggestions.is_empty() || count == 0 {
        return Vec::new();
    }
    let len = suggestions.len();
    let take = count.min(len);
    let start = ((refresh as usize).wrapping_mul(take)) % len;
    (0..take)
        .map(|offset| suggestions[(start + offset) % len].clone())
        .collect()
}
