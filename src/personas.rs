//! Persona store: the durable catalog of identity profiles.
//!
//! One pretty-printed JSON file per persona under the config root's
//! `personas/` directory. The store also tracks which live tabs reference
//! which persona, so deletion can refuse (or force-reassign) safely.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Persona, PersonaProfile, PersonaValidationError};

/// Errors from the persona catalog.
#[derive(Debug, Error)]
pub enum PersonaError {
    #[error(transparent)]
    Validation(#[from] PersonaValidationError),

    #[error("persona not found: {0}")]
    NotFound(String),

    #[error("persona '{id}' is referenced by {tabs} live tab(s)")]
    Conflict { id: String, tabs: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable persona catalog.
pub struct PersonaStore {
    dir: PathBuf,
    /// Substituted for dangling references and forced-delete dependents.
    default_id: String,
    /// In-memory catalog in creation order.
    personas: Vec<Persona>,
    /// Live tab -> persona references, registered by the embedding runtime.
    live_refs: HashMap<String, String>,
}

impl PersonaStore {
    /// Open the catalog, loading every persona file in the directory.
    ///
    /// Corrupt or invalid files are skipped with a warning, never fatal.
    /// Files on an older schema version are migrated and rewritten.
    /// Callers run [`seed_defaults`](Self::seed_defaults) once at startup.
    pub fn open(
        dir: impl Into<PathBuf>,
        default_id: impl Into<String>,
    ) -> Result<Self, PersonaError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut personas = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_file(&path) {
                Ok(persona) => personas.push(persona),
                Err(e) => {
                    warn!("skipping persona file {}: {}", path.display(), e);
                }
            }
        }
        personas.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        debug!("loaded {} personas from {}", personas.len(), dir.display());

        Ok(Self {
            dir,
            default_id: default_id.into(),
            personas,
            live_refs: HashMap::new(),
        })
    }

    /// Load one persona file, migrating older schema versions in place.
    fn load_file(path: &Path) -> Result<Persona, PersonaError> {
        let contents = fs::read_to_string(path)?;
        let raw: Persona = serde_json::from_str(&contents)?;
        let needs_rewrite = raw.schema_version != Persona::SCHEMA_VERSION;
        let persona = raw.migrate()?;
        persona.validate()?;
        if needs_rewrite {
            info!(
                "migrated persona file {} to schema v{}",
                path.display(),
                Persona::SCHEMA_VERSION
            );
            fs::write(path, serde_json::to_string_pretty(&persona)?)?;
        }
        Ok(persona)
    }

    fn persona_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn persist(&self, persona: &Persona) -> Result<(), PersonaError> {
        let json = serde_json::to_string_pretty(persona)?;
        fs::write(self.persona_path(&persona.id), json)?;
        Ok(())
    }

    /// Create a persona from a profile. Colliding ids are rejected before
    /// any side effect.
    pub fn create(&mut self, profile: PersonaProfile) -> Result<Persona, PersonaError> {
        if self.personas.iter().any(|p| p.id == profile.id) {
            return Err(PersonaError::Validation(PersonaValidationError {
                reason: format!("id '{}' already exists", profile.id),
            }));
        }
        let persona = Persona::new(profile)?;
        self.persist(&persona)?;
        self.personas.push(persona.clone());
        info!("created persona '{}'", persona.id);
        Ok(persona)
    }

    /// Look up a persona by id. Returns an owned copy; personas are
    /// immutable values, never handed out by mutable reference.
    pub fn get(&self, id: &str) -> Result<Persona, PersonaError> {
        self.personas
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| PersonaError::NotFound(id.to_string()))
    }

    /// All personas in creation order.
    pub fn list(&self) -> Vec<Persona> {
        self.personas.clone()
    }

    /// Delete a persona.
    ///
    /// Fails with `Conflict` while live tabs reference it, unless `force`
    /// is set, in which case dependents are reassigned to the default
    /// persona. The default persona itself cannot be force-deleted away
    /// from under its dependents.
    pub fn delete(&mut self, id: &str, force: bool) -> Result<(), PersonaError> {
        if !self.personas.iter().any(|p| p.id == id) {
            return Err(PersonaError::NotFound(id.to_string()));
        }

        let tabs = self.live_reference_count(id);
        if tabs > 0 {
            if !force || id == self.default_id {
                return Err(PersonaError::Conflict {
                    id: id.to_string(),
                    tabs,
                });
            }
            let fallback = self.default_id.clone();
            for persona_ref in self.live_refs.values_mut() {
                if persona_ref == id {
                    *persona_ref = fallback.clone();
                }
            }
            info!(
                "reassigned {} live tab(s) from '{}' to '{}'",
                tabs, id, fallback
            );
        }

        let path = self.persona_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        self.personas.retain(|p| p.id != id);
        info!("deleted persona '{}'", id);
        Ok(())
    }

    /// Record that a live tab uses a persona.
    pub fn register_tab(&mut self, tab_id: &str, persona_id: &str) -> Result<(), PersonaError> {
        if !self.personas.iter().any(|p| p.id == persona_id) {
            return Err(PersonaError::NotFound(persona_id.to_string()));
        }
        self.live_refs
            .insert(tab_id.to_string(), persona_id.to_string());
        Ok(())
    }

    /// Drop a live tab's persona reference (tab closed).
    pub fn release_tab(&mut self, tab_id: &str) {
        self.live_refs.remove(tab_id);
    }

    /// Number of live tabs currently referencing a persona.
    pub fn live_reference_count(&self, persona_id: &str) -> usize {
        self.live_refs.values().filter(|p| *p == persona_id).count()
    }

    /// Resolve a persona reference, substituting the default for dangling
    /// ids (a persona may be deleted independently of sessions that still
    /// name it).
    pub fn resolve_or_default(&self, id: &str) -> Result<Persona, PersonaError> {
        match self.get(id) {
            Ok(persona) => Ok(persona),
            Err(PersonaError::NotFound(_)) => {
                debug!(
                    "persona '{}' no longer exists, substituting '{}'",
                    id, self.default_id
                );
                self.get(&self.default_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Seed the documented default personas. Idempotent; returns how many
    /// were newly created.
    pub fn seed_defaults(&mut self) -> Result<usize, PersonaError> {
        let mut created = 0;
        for profile in Persona::default_profiles() {
            if self.personas.iter().any(|p| p.id == profile.id) {
                continue;
            }
            self.create(profile)?;
            created += 1;
        }
        if created > 0 {
            info!("seeded {} default personas", created);
        }
        Ok(created)
    }

    /// Id of the configured default persona.
    pub fn default_id(&self) -> &str {
        &self.default_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &Path) -> PersonaStore {
        PersonaStore::open(dir, "anonymous").unwrap()
    }

    fn custom_profile(id: &str) -> PersonaProfile {
        PersonaProfile {
            id: id.to_string(),
            name: "Custom".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0"
                .to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            timezone: "UTC".to_string(),
            screen_resolution: "1280x720".to_string(),
            color_depth: 24,
            javascript_enabled: true,
            plugins_enabled: false,
            webgl_enabled: true,
            canvas_protection: true,
            audio_protection: false,
            description: String::new(),
        }
    }

    #[test]
    fn test_seeding_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        assert_eq!(store.seed_defaults().unwrap(), 3);
        assert_eq!(store.seed_defaults().unwrap(), 0);
        assert_eq!(store.list().len(), 3);

        // Reopening and reseeding does not duplicate either
        let mut store = open_store(dir.path());
        assert_eq!(store.seed_defaults().unwrap(), 0);
        assert_eq!(store.list().len(), 3);
    }

    #[test]
    fn test_create_get_and_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.create(custom_profile("zeta")).unwrap();
        store.create(custom_profile("alpha")).unwrap();

        let ids: Vec<String> = store.list().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["zeta", "alpha"], "creation order, not alphabetical");
        assert_eq!(store.get("alpha").unwrap().name, "Custom");
        assert!(matches!(
            store.get("missing"),
            Err(PersonaError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_collision_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.create(custom_profile("dupe")).unwrap();
        let err = store.create(custom_profile("dupe")).unwrap_err();
        assert!(matches!(err, PersonaError::Validation(_)));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_catalog_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = open_store(dir.path());
            store.seed_defaults().unwrap();
            store.create(custom_profile("extra")).unwrap();
        }
        let store = open_store(dir.path());
        let ids: Vec<String> = store.list().into_iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), 4);
        assert!(ids.contains(&"extra".to_string()));
    }

    #[test]
    fn test_delete_with_live_reference_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.seed_defaults().unwrap();
        store.create(custom_profile("work")).unwrap();
        store.register_tab("tab-1", "work").unwrap();

        let err = store.delete("work", false).unwrap_err();
        assert!(matches!(err, PersonaError::Conflict { tabs: 1, .. }));
        assert!(store.get("work").is_ok());
    }

    #[test]
    fn test_force_delete_reassigns_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.seed_defaults().unwrap();
        store.create(custom_profile("work")).unwrap();
        store.register_tab("tab-1", "work").unwrap();
        store.register_tab("tab-2", "work").unwrap();

        store.delete("work", true).unwrap();
        assert!(matches!(
            store.get("work"),
            Err(PersonaError::NotFound(_))
        ));
        assert_eq!(store.live_reference_count("anonymous"), 2);
        assert_eq!(store.live_reference_count("work"), 0);
    }

    #[test]
    fn test_default_persona_not_force_deletable_with_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.seed_defaults().unwrap();
        store.register_tab("tab-1", "anonymous").unwrap();

        let err = store.delete("anonymous", true).unwrap_err();
        assert!(matches!(err, PersonaError::Conflict { .. }));
    }

    #[test]
    fn test_release_tab_unblocks_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.create(custom_profile("work")).unwrap();
        store.register_tab("tab-1", "work").unwrap();
        store.release_tab("tab-1");
        store.delete("work", false).unwrap();
    }

    #[test]
    fn test_register_tab_unknown_persona_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        assert!(matches!(
            store.register_tab("tab-1", "ghost"),
            Err(PersonaError::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_file_skipped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = open_store(dir.path());
            store.seed_defaults().unwrap();
        }
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = open_store(dir.path());
        assert_eq!(store.list().len(), 3);
    }

    #[test]
    fn test_v0_file_migrated_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        // Pre-versioned file layout: no schema_version, no description
        let v0 = serde_json::json!({
            "id": "legacy",
            "name": "Legacy",
            "user_agent": "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/78.0",
            "accept_language": "en-US,en;q=0.9",
            "timezone": "UTC",
            "screen_resolution": "1024x768",
            "color_depth": 24,
            "javascript_enabled": true,
            "plugins_enabled": false,
            "webgl_enabled": false,
            "canvas_protection": true,
            "audio_protection": true,
            "created_at": "2021-06-01T00:00:00Z"
        });
        fs::write(
            dir.path().join("legacy.json"),
            serde_json::to_string_pretty(&v0).unwrap(),
        )
        .unwrap();

        let store = open_store(dir.path());
        let legacy = store.get("legacy").unwrap();
        assert_eq!(legacy.schema_version, Persona::SCHEMA_VERSION);
        assert_eq!(legacy.description, "");

        let rewritten = fs::read_to_string(dir.path().join("legacy.json")).unwrap();
        assert!(rewritten.contains("\"schema_version\": 1"));
    }

    #[test]
    fn test_resolve_or_default_substitutes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.seed_defaults().unwrap();
        assert_eq!(store.resolve_or_default("gone").unwrap().id, "anonymous");
        assert_eq!(store.resolve_or_default("stealth").unwrap().id, "stealth");
    }
}
