//! Fingerprint guard compiler.
//!
//! Compiles a persona into an ordered set of data-only runtime directives:
//! header rules, script-guard parameter blocks, and feature flags. The
//! embedding runtime interprets the parameters; this module never
//! concatenates executable script text.
//!
//! Determinism: for a persona `P` and tab seed `S`, `compile(P, S)` yields
//! byte-identical parameters on every call. Noise differs across tabs
//! because the seed differs, not because anything here is random.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::Persona;

/// Vendor/renderer pairs advertised when WebGL masking is active.
const WEBGL_IDENTITIES: [(&str, &str); 3] = [
    ("Intel Inc.", "Intel Iris OpenGL Engine"),
    (
        "Intel Open Source Technology Center",
        "Mesa DRI Intel(R) HD Graphics 520",
    ),
    (
        "Google Inc. (Intel)",
        "ANGLE (Intel, Intel(R) UHD Graphics Direct3D11 vs_5_0 ps_5_0, D3D11)",
    ),
];

/// What to do with one request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum HeaderAction {
    /// Rewrite the header to a fixed value.
    Set(String),
    /// Remove the header outright.
    Strip,
}

/// A single header rewrite/strip rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub header: String,
    pub action: HeaderAction,
}

/// Parameters for one script-level fingerprint countermeasure.
///
/// Data only; the runtime's injection layer turns these into whatever its
/// script engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "surface", rename_all = "snake_case")]
pub enum ScriptGuard {
    /// Canvas export and pixel-read quantization. Output values are
    /// bucketed so repeated reads yield a stable, non-identifying
    /// signature.
    Canvas { bucket_size: u8, noise_seed: u64 },
    /// Audio API output perturbation, seeded per tab so it is
    /// reproducible within a tab's lifetime but differs across tabs.
    Audio { noise_seed: u64, amplitude: f64 },
    /// WebGL vendor/renderer masking.
    Webgl { vendor: String, renderer: String },
}

impl ScriptGuard {
    /// Short label for the guarded surface.
    pub fn surface(&self) -> &'static str {
        match self {
            Self::Canvas { .. } => "canvas",
            Self::Audio { .. } => "audio",
            Self::Webgl { .. } => "webgl",
        }
    }
}

/// Runtime capabilities toggled per tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFeature {
    Javascript,
    Plugins,
    Webgl,
    LocalStorage,
    SessionStorage,
}

impl RuntimeFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Javascript => "javascript",
            Self::Plugins => "plugins",
            Self::Webgl => "webgl",
            Self::LocalStorage => "local_storage",
            Self::SessionStorage => "session_storage",
        }
    }
}

/// One feature toggle in the compiled set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub feature: RuntimeFeature,
    pub enabled: bool,
}

/// One compiled directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    Header(HeaderRule),
    Script(ScriptGuard),
    Feature(FeatureFlag),
}

/// The ordered outcome of compiling one persona for one tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveSet {
    pub persona_id: String,
    pub tab_seed: u64,
    pub directives: Vec<Directive>,
    /// Suggested zoom for the persona's advertised resolution.
    pub zoom_factor: f64,
}

impl DirectiveSet {
    pub fn header_rules(&self) -> impl Iterator<Item = &HeaderRule> {
        self.directives.iter().filter_map(|d| match d {
            Directive::Header(rule) => Some(rule),
            _ => None,
        })
    }

    pub fn script_guards(&self) -> impl Iterator<Item = &ScriptGuard> {
        self.directives.iter().filter_map(|d| match d {
            Directive::Script(guard) => Some(guard),
            _ => None,
        })
    }

    pub fn feature_flags(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.directives.iter().filter_map(|d| match d {
            Directive::Feature(flag) => Some(flag),
            _ => None,
        })
    }
}

/// Compile a persona into its directive set for one tab.
///
/// Pure and total over valid personas. JavaScript-dependent guards are
/// omitted entirely when the persona disables JavaScript; a disabled
/// capability needs no noise.
pub fn compile(persona: &Persona, tab_seed: u64) -> DirectiveSet {
    let mut directives = Vec::new();

    directives.push(Directive::Header(HeaderRule {
        header: "User-Agent".to_string(),
        action: HeaderAction::Set(persona.user_agent.clone()),
    }));
    directives.push(Directive::Header(HeaderRule {
        header: "Accept-Language".to_string(),
        action: HeaderAction::Set(persona.accept_language.clone()),
    }));
    directives.push(Directive::Header(HeaderRule {
        header: "Referer".to_string(),
        action: HeaderAction::Strip,
    }));
    directives.push(Directive::Header(HeaderRule {
        header: "Origin".to_string(),
        action: HeaderAction::Strip,
    }));
    directives.push(Directive::Header(HeaderRule {
        header: "DNT".to_string(),
        action: HeaderAction::Set("1".to_string()),
    }));
    directives.push(Directive::Header(HeaderRule {
        header: "Sec-GPC".to_string(),
        action: HeaderAction::Set("1".to_string()),
    }));

    for (feature, enabled) in [
        (RuntimeFeature::Javascript, persona.javascript_enabled),
        (RuntimeFeature::Plugins, persona.plugins_enabled),
        (RuntimeFeature::Webgl, persona.webgl_enabled),
        // Storage stays off for every persona
        (RuntimeFeature::LocalStorage, false),
        (RuntimeFeature::SessionStorage, false),
    ] {
        directives.push(Directive::Feature(FeatureFlag { feature, enabled }));
    }

    if persona.javascript_enabled {
        if persona.canvas_protection {
            let bytes = derive_bytes(&persona.id, tab_seed, "canvas");
            directives.push(Directive::Script(ScriptGuard::Canvas {
                bucket_size: 2 + (bytes[8] % 7),
                noise_seed: seed_from(&bytes),
            }));
        }
        if persona.audio_protection {
            let bytes = derive_bytes(&persona.id, tab_seed, "audio");
            directives.push(Directive::Script(ScriptGuard::Audio {
                noise_seed: seed_from(&bytes),
                amplitude: f64::from(1 + bytes[8] % 9) * 1e-5,
            }));
        }
        if persona.webgl_enabled {
            let bytes = derive_bytes(&persona.id, tab_seed, "webgl");
            let (vendor, renderer) =
                WEBGL_IDENTITIES[usize::from(bytes[8]) % WEBGL_IDENTITIES.len()];
            directives.push(Directive::Script(ScriptGuard::Webgl {
                vendor: vendor.to_string(),
                renderer: renderer.to_string(),
            }));
        }
    }

    let (width, _) = persona.screen_dimensions().unwrap_or((1920, 1080));

    DirectiveSet {
        persona_id: persona.id.clone(),
        tab_seed,
        directives,
        zoom_factor: suggested_zoom(width),
    }
}

/// Derive a tab's noise seed from its id. Stable across restarts, so a
/// restored tab keeps the fingerprint it was created with.
pub fn tab_seed(tab_id: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(tab_id.as_bytes());
    seed_from(&hasher.finalize().into())
}

/// Derive stable noise bytes for one (persona, tab, surface) triple.
fn derive_bytes(persona_id: &str, tab_seed: u64, surface: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(persona_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(tab_seed.to_le_bytes());
    hasher.update(surface.as_bytes());
    hasher.finalize().into()
}

fn seed_from(bytes: &[u8; 32]) -> u64 {
    let mut le = [0u8; 8];
    le.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(le)
}

fn suggested_zoom(width: u32) -> f64 {
    if width <= 1024 {
        0.8
    } else if width <= 1366 {
        0.9
    } else if width >= 1920 {
        1.1
    } else {
        1.0
    }
}

/// Cache of compiled directive sets keyed by persona id and tab seed.
///
/// Compilation is cheap but the runtime re-applies directives on every
/// navigation; caching also guarantees a tab keeps seeing the exact set
/// it started with until explicitly invalidated.
#[derive(Debug, Default)]
pub struct DirectiveCache {
    entries: HashMap<(String, u64), Arc<DirectiveSet>>,
}

impl DirectiveCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&mut self, persona: &Persona, tab_seed: u64) -> Arc<DirectiveSet> {
        self.entries
            .entry((persona.id.clone(), tab_seed))
            .or_insert_with(|| Arc::new(compile(persona, tab_seed)))
            .clone()
    }

    /// Drop every cached set for a persona (deleted or replaced).
    pub fn invalidate(&mut self, persona_id: &str) {
        self.entries.retain(|(id, _), _| id != persona_id);
    }

    /// Drop everything. Nothing of a previous persona may leak into the
    /// next one; the panic path calls this.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersonaProfile;

    fn persona(js: bool, canvas: bool, audio: bool, webgl: bool) -> Persona {
        Persona::new(PersonaProfile {
            id: "subject".to_string(),
            name: "Subject".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0"
                .to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            timezone: "UTC".to_string(),
            screen_resolution: "1920x1080".to_string(),
            color_depth: 24,
            javascript_enabled: js,
            plugins_enabled: false,
            webgl_enabled: webgl,
            canvas_protection: canvas,
            audio_protection: audio,
            description: String::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_compile_is_deterministic() {
        let p = persona(true, true, true, true);
        let first = compile(&p, 42);
        let second = compile(&p, 42);
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_seeds_produce_distinct_noise() {
        let p = persona(true, true, true, false);
        let a = compile(&p, 1);
        let b = compile(&p, 2);
        let seed_a = a.script_guards().find_map(|g| match g {
            ScriptGuard::Canvas { noise_seed, .. } => Some(*noise_seed),
            _ => None,
        });
        let seed_b = b.script_guards().find_map(|g| match g {
            ScriptGuard::Canvas { noise_seed, .. } => Some(*noise_seed),
            _ => None,
        });
        assert_ne!(seed_a, seed_b);
    }

    #[test]
    fn test_javascript_disabled_omits_script_guards() {
        let p = persona(false, true, true, true);
        let set = compile(&p, 7);
        assert_eq!(set.script_guards().count(), 0);
        // Header rules and feature flags still compile
        assert!(set.header_rules().count() > 0);
        assert!(set
            .feature_flags()
            .any(|f| f.feature == RuntimeFeature::Javascript && !f.enabled));
    }

    #[test]
    fn test_canvas_guard_without_webgl_disable() {
        let p = persona(true, true, false, true);
        let set = compile(&p, 7);
        let canvas_guards = set
            .script_guards()
            .filter(|g| matches!(g, ScriptGuard::Canvas { .. }))
            .count();
        assert_eq!(canvas_guards, 1);
        let webgl_disables = set
            .feature_flags()
            .filter(|f| f.feature == RuntimeFeature::Webgl && !f.enabled)
            .count();
        assert_eq!(webgl_disables, 0, "webgl stays enabled unless toggled off");
    }

    #[test]
    fn test_webgl_masking_only_when_webgl_enabled() {
        let without = compile(&persona(true, true, true, false), 7);
        assert!(!without
            .script_guards()
            .any(|g| matches!(g, ScriptGuard::Webgl { .. })));

        let with = compile(&persona(true, true, true, true), 7);
        let masked = with.script_guards().find_map(|g| match g {
            ScriptGuard::Webgl { vendor, renderer } => Some((vendor.clone(), renderer.clone())),
            _ => None,
        });
        let (vendor, _) = masked.expect("webgl guard present");
        assert!(WEBGL_IDENTITIES.iter().any(|(v, _)| *v == vendor));
    }

    #[test]
    fn test_header_rules_cover_identity_surface() {
        let p = persona(true, false, false, false);
        let set = compile(&p, 7);
        let rule = |name: &str| {
            set.header_rules()
                .find(|r| r.header == name)
                .map(|r| r.action.clone())
        };
        assert_eq!(rule("User-Agent"), Some(HeaderAction::Set(p.user_agent.clone())));
        assert_eq!(
            rule("Accept-Language"),
            Some(HeaderAction::Set("en-US,en;q=0.9".to_string()))
        );
        assert_eq!(rule("Referer"), Some(HeaderAction::Strip));
        assert_eq!(rule("Origin"), Some(HeaderAction::Strip));
        assert_eq!(rule("DNT"), Some(HeaderAction::Set("1".to_string())));
        assert_eq!(rule("Sec-GPC"), Some(HeaderAction::Set("1".to_string())));
    }

    #[test]
    fn test_storage_always_disabled() {
        let set = compile(&persona(true, true, true, true), 7);
        for feature in [RuntimeFeature::LocalStorage, RuntimeFeature::SessionStorage] {
            assert!(set
                .feature_flags()
                .any(|f| f.feature == feature && !f.enabled));
        }
    }

    #[test]
    fn test_zoom_follows_resolution() {
        for (resolution, expected) in [
            ("1024x768", 0.8),
            ("800x600", 0.8),
            ("1366x768", 0.9),
            ("1920x1080", 1.1),
            ("2560x1440", 1.1),
            ("1600x900", 1.0),
        ] {
            let mut p = persona(true, false, false, false);
            p.screen_resolution = resolution.to_string();
            let set = compile(&p, 7);
            assert_eq!(set.zoom_factor, expected, "resolution {}", resolution);
        }
    }

    #[test]
    fn test_tab_seed_stable_and_distinct() {
        assert_eq!(tab_seed("tab-a"), tab_seed("tab-a"));
        assert_ne!(tab_seed("tab-a"), tab_seed("tab-b"));
    }

    #[test]
    fn test_cache_returns_identical_set_and_invalidates() {
        let p = persona(true, true, true, false);
        let mut cache = DirectiveCache::new();
        let a = cache.get_or_compile(&p, 1);
        let b = cache.get_or_compile(&p, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        cache.get_or_compile(&p, 2);
        assert_eq!(cache.len(), 2);

        cache.invalidate("subject");
        assert!(cache.is_empty());
    }
}
