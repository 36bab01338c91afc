//! Persona models for per-identity fingerprint resistance.
//!
//! A persona is an immutable bundle of browser-identity attributes and
//! privacy-capability flags. Changing a setting produces a new persona;
//! nothing mutates a persona referenced by a live tab.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Color depths a persona may advertise.
const ALLOWED_COLOR_DEPTHS: [u8; 5] = [1, 8, 16, 24, 32];

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap());

// Product/version token at the front, e.g. "Mozilla/5.0 (...)"
static USER_AGENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9.-]*/[0-9][0-9.]*").unwrap());

// One Accept-Language entry: language tag or wildcard, optional q-value
static LANGUAGE_ENTRY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*|[A-Za-z]{2,8}(-[A-Za-z0-9]{1,8})*)(;\s*q=[01](\.[0-9]{1,3})?)?$").unwrap()
});

// "UTC" or "Area/Location" style identifiers
static TIMEZONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]+([+-][0-9]{1,2})?(/[A-Za-z0-9_+-]+)*$").unwrap());

static RESOLUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{2,5})x([0-9]{2,5})$").unwrap());

/// Validation failure for a persona profile, raised before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid persona: {reason}")]
pub struct PersonaValidationError {
    pub reason: String,
}

impl PersonaValidationError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Raw profile attributes for creating a persona.
///
/// Validated and stamped by [`Persona::new`]; never stored as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub id: String,
    pub name: String,
    pub user_agent: String,
    pub accept_language: String,
    pub timezone: String,
    pub screen_resolution: String,
    pub color_depth: u8,
    pub javascript_enabled: bool,
    pub plugins_enabled: bool,
    pub webgl_enabled: bool,
    pub canvas_protection: bool,
    pub audio_protection: bool,
    #[serde(default)]
    pub description: String,
}

/// A named, immutable identity profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Stable unique identifier; immutable once created.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Advertised User-Agent string.
    pub user_agent: String,
    /// Advertised Accept-Language list.
    pub accept_language: String,
    /// Advertised timezone identifier.
    pub timezone: String,
    /// Advertised screen resolution as `<width>x<height>`.
    pub screen_resolution: String,
    /// Advertised color depth in bits.
    pub color_depth: u8,
    pub javascript_enabled: bool,
    pub plugins_enabled: bool,
    pub webgl_enabled: bool,
    pub canvas_protection: bool,
    pub audio_protection: bool,
    /// Free-text description shown in persona listings.
    #[serde(default)]
    pub description: String,
    /// Serialization schema version; files from older versions are migrated
    /// on load.
    #[serde(default)]
    pub schema_version: u32,
    /// Creation timestamp; listings are ordered by it.
    pub created_at: DateTime<Utc>,
}

impl Persona {
    /// Current persona file schema version.
    pub const SCHEMA_VERSION: u32 = 1;

    /// Validate a profile and construct the persona value.
    pub fn new(profile: PersonaProfile) -> Result<Self, PersonaValidationError> {
        let persona = Self {
            id: profile.id,
            name: profile.name,
            user_agent: profile.user_agent,
            accept_language: profile.accept_language,
            timezone: profile.timezone,
            screen_resolution: profile.screen_resolution,
            color_depth: profile.color_depth,
            javascript_enabled: profile.javascript_enabled,
            plugins_enabled: profile.plugins_enabled,
            webgl_enabled: profile.webgl_enabled,
            canvas_protection: profile.canvas_protection,
            audio_protection: profile.audio_protection,
            description: profile.description,
            schema_version: Self::SCHEMA_VERSION,
            created_at: Utc::now(),
        };
        persona.validate()?;
        Ok(persona)
    }

    /// Check every attribute against its allowed range.
    ///
    /// Also run on personas deserialized from disk, since serde bypasses
    /// the validating constructor.
    pub fn validate(&self) -> Result<(), PersonaValidationError> {
        if !ID_PATTERN.is_match(&self.id) {
            return Err(PersonaValidationError::new(format!(
                "id '{}' must be a lowercase slug (a-z, 0-9, '-', '_')",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(PersonaValidationError::new("name must not be empty"));
        }
        if !USER_AGENT_PATTERN.is_match(&self.user_agent) {
            return Err(PersonaValidationError::new(format!(
                "malformed user_agent '{}'",
                self.user_agent
            )));
        }
        if self.accept_language.is_empty()
            || !self
                .accept_language
                .split(',')
                .map(str::trim)
                .all(|entry| LANGUAGE_ENTRY_PATTERN.is_match(entry))
        {
            return Err(PersonaValidationError::new(format!(
                "malformed accept_language '{}'",
                self.accept_language
            )));
        }
        if !TIMEZONE_PATTERN.is_match(&self.timezone) {
            return Err(PersonaValidationError::new(format!(
                "malformed timezone '{}'",
                self.timezone
            )));
        }
        match self.screen_dimensions() {
            Some((w, h)) if w > 0 && h > 0 => {}
            _ => {
                return Err(PersonaValidationError::new(format!(
                    "screen_resolution '{}' must be <width>x<height>",
                    self.screen_resolution
                )))
            }
        }
        if !ALLOWED_COLOR_DEPTHS.contains(&self.color_depth) {
            return Err(PersonaValidationError::new(format!(
                "color_depth {} not in {:?}",
                self.color_depth, ALLOWED_COLOR_DEPTHS
            )));
        }
        Ok(())
    }

    /// Bring a persona loaded from an older schema up to the current version.
    /// Unknown newer versions are rejected.
    pub fn migrate(mut self) -> Result<Self, PersonaValidationError> {
        match self.schema_version {
            // v0 files predate description/schema_version; serde fills both
            0 => {
                self.schema_version = Self::SCHEMA_VERSION;
                Ok(self)
            }
            Self::SCHEMA_VERSION => Ok(self),
            newer => Err(PersonaValidationError::new(format!(
                "unsupported persona schema version {}",
                newer
            ))),
        }
    }

    /// Parsed screen resolution, if well-formed.
    pub fn screen_dimensions(&self) -> Option<(u32, u32)> {
        let caps = RESOLUTION_PATTERN.captures(&self.screen_resolution)?;
        let width = caps.get(1)?.as_str().parse().ok()?;
        let height = caps.get(2)?.as_str().parse().ok()?;
        Some((width, height))
    }

    /// The documented first-run default profiles, in seeding order.
    pub fn default_profiles() -> Vec<PersonaProfile> {
        vec![
            PersonaProfile {
                id: "anonymous".to_string(),
                name: "Anonymous".to_string(),
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                    .to_string(),
                accept_language: "en-US,en;q=0.9".to_string(),
                timezone: "UTC".to_string(),
                screen_resolution: "1920x1080".to_string(),
                color_depth: 24,
                javascript_enabled: true,
                plugins_enabled: false,
                webgl_enabled: false,
                canvas_protection: true,
                audio_protection: true,
                description: "Basic anonymous browsing persona".to_string(),
            },
            PersonaProfile {
                id: "researcher".to_string(),
                name: "Security Researcher".to_string(),
                user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                    .to_string(),
                accept_language: "en-US,en;q=0.9".to_string(),
                timezone: "UTC".to_string(),
                screen_resolution: "1366x768".to_string(),
                color_depth: 24,
                javascript_enabled: true,
                plugins_enabled: false,
                webgl_enabled: false,
                canvas_protection: true,
                audio_protection: true,
                description: "Research-focused persona with enhanced privacy".to_string(),
            },
            PersonaProfile {
                id: "stealth".to_string(),
                name: "Maximum Stealth".to_string(),
                user_agent: "Mozilla/5.0 (Windows NT 6.1; Win64; x64; rv:78.0) \
                             Gecko/20100101 Firefox/78.0"
                    .to_string(),
                accept_language: "en-US,en;q=0.5".to_string(),
                timezone: "UTC".to_string(),
                screen_resolution: "1024x768".to_string(),
                color_depth: 16,
                javascript_enabled: false,
                plugins_enabled: false,
                webgl_enabled: false,
                canvas_protection: true,
                audio_protection: true,
                description: "Maximum privacy and anonymity settings".to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> PersonaProfile {
        PersonaProfile {
            id: id.to_string(),
            name: "Test".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0"
                .to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            timezone: "Europe/Berlin".to_string(),
            screen_resolution: "1920x1080".to_string(),
            color_depth: 24,
            javascript_enabled: true,
            plugins_enabled: false,
            webgl_enabled: false,
            canvas_protection: true,
            audio_protection: true,
            description: String::new(),
        }
    }

    #[test]
    fn test_valid_profile_constructs() {
        let persona = Persona::new(profile("alpha")).unwrap();
        assert_eq!(persona.id, "alpha");
        assert_eq!(persona.schema_version, Persona::SCHEMA_VERSION);
        assert_eq!(persona.screen_dimensions(), Some((1920, 1080)));
    }

    #[test]
    fn test_rejects_bad_id() {
        assert!(Persona::new(profile("")).is_err());
        assert!(Persona::new(profile("Has Spaces")).is_err());
        assert!(Persona::new(profile("UPPER")).is_err());
        assert!(Persona::new(profile("ok-id_2")).is_ok());
    }

    #[test]
    fn test_rejects_empty_name() {
        let mut p = profile("alpha");
        p.name = "   ".to_string();
        assert!(Persona::new(p).is_err());
    }

    #[test]
    fn test_rejects_malformed_user_agent() {
        let mut p = profile("alpha");
        p.user_agent = "not a user agent".to_string();
        assert!(Persona::new(p).is_err());

        let mut p = profile("alpha");
        p.user_agent = String::new();
        assert!(Persona::new(p).is_err());
    }

    #[test]
    fn test_rejects_malformed_accept_language() {
        for bad in ["", "english please", "en;;q=1", "en-US,"] {
            let mut p = profile("alpha");
            p.accept_language = bad.to_string();
            assert!(Persona::new(p).is_err(), "accepted {:?}", bad);
        }
        let mut p = profile("alpha");
        p.accept_language = "de-DE,de;q=0.8,*;q=0.5".to_string();
        assert!(Persona::new(p).is_ok());
    }

    #[test]
    fn test_rejects_bad_timezone() {
        let mut p = profile("alpha");
        p.timezone = "not a tz!".to_string();
        assert!(Persona::new(p).is_err());
    }

    #[test]
    fn test_rejects_bad_resolution() {
        for bad in ["1920", "0x0", "1920x", "x1080", "1920 x 1080"] {
            let mut p = profile("alpha");
            p.screen_resolution = bad.to_string();
            assert!(Persona::new(p).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_rejects_bad_color_depth() {
        let mut p = profile("alpha");
        p.color_depth = 12;
        assert!(Persona::new(p).is_err());
        for depth in [1u8, 8, 16, 24, 32] {
            let mut p = profile("alpha");
            p.color_depth = depth;
            assert!(Persona::new(p).is_ok());
        }
    }

    #[test]
    fn test_migrate_v0_stamps_current_version() {
        let mut persona = Persona::new(profile("alpha")).unwrap();
        persona.schema_version = 0;
        let migrated = persona.migrate().unwrap();
        assert_eq!(migrated.schema_version, Persona::SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_rejects_newer_version() {
        let mut persona = Persona::new(profile("alpha")).unwrap();
        persona.schema_version = Persona::SCHEMA_VERSION + 1;
        assert!(persona.migrate().is_err());
    }

    #[test]
    fn test_default_profiles_all_valid() {
        let profiles = Persona::default_profiles();
        assert_eq!(profiles.len(), 3);
        let ids: Vec<String> = profiles.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, ["anonymous", "researcher", "stealth"]);
        for p in profiles {
            assert!(Persona::new(p).is_ok());
        }
    }

    #[test]
    fn test_stealth_profile_documented_values() {
        let profiles = Persona::default_profiles();
        let stealth = profiles.iter().find(|p| p.id == "stealth").unwrap();
        assert!(!stealth.javascript_enabled);
        assert_eq!(stealth.color_depth, 16);
        assert_eq!(stealth.screen_resolution, "1024x768");
        assert!(stealth.canvas_protection);
    }

    #[test]
    fn test_serde_round_trip() {
        let persona = Persona::new(profile("alpha")).unwrap();
        let json = serde_json::to_string_pretty(&persona).unwrap();
        let back: Persona = serde_json::from_str(&json).unwrap();
        assert_eq!(back, persona);
    }
}
