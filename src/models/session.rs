//! Session and tab models.
//!
//! Sessions group tabs under a persona reference; tabs carry their own
//! navigation history. Both persist as whole-session snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named browsing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    /// Persona reference, not ownership. A deleted persona leaves this
    /// dangling; loads substitute the configured default.
    pub persona_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Auxiliary client state, round-tripped opaquely except for
    /// `active_tab`, which this core understands.
    #[serde(default = "empty_data")]
    pub data: serde_json::Value,
}

fn empty_data() -> serde_json::Value {
    serde_json::json!({})
}

impl Session {
    pub fn new(name: impl Into<String>, persona_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            persona_id: persona_id.into(),
            created_at: now,
            last_accessed: now,
            data: empty_data(),
        }
    }

    /// Id of the tab that was focused when the session was saved.
    pub fn active_tab(&self) -> Option<&str> {
        self.data.get("active_tab").and_then(|v| v.as_str())
    }

    pub fn set_active_tab(&mut self, tab_id: &str) {
        if let serde_json::Value::Object(map) = &mut self.data {
            map.insert(
                "active_tab".to_string(),
                serde_json::Value::String(tab_id.to_string()),
            );
        } else {
            self.data = serde_json::json!({ "active_tab": tab_id });
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }
}

/// A single tab within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    /// Owning session; deleting the session deletes the tab.
    pub session_id: String,
    pub url: String,
    pub title: String,
    pub persona_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Visited URLs in order. Append-only while the tab is live; stored as
    /// a finite serialized sequence, truncation is the caller's policy.
    pub history: Vec<String>,
    pub scroll_position: i32,
    pub zoom_factor: f64,
}

impl Tab {
    pub fn new(
        session_id: impl Into<String>,
        persona_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let url = url.into();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            url: url.clone(),
            title: String::new(),
            persona_id: persona_id.into(),
            created_at: now,
            last_accessed: now,
            history: vec![url],
            scroll_position: 0,
            zoom_factor: 1.0,
        }
    }

    /// Navigate the tab: append to history and update the current URL.
    pub fn visit(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.history.push(url.clone());
        self.url = url;
        self.last_accessed = Utc::now();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Drop the oldest history entries beyond `max_entries`.
    pub fn truncate_history(&mut self, max_entries: usize) {
        if self.history.len() > max_entries {
            let excess = self.history.len() - max_entries;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_has_empty_data() {
        let session = Session::new("work", "anonymous");
        assert!(!session.id.is_empty());
        assert_eq!(session.active_tab(), None);
        assert_eq!(session.data, serde_json::json!({}));
    }

    #[test]
    fn test_active_tab_round_trip() {
        let mut session = Session::new("work", "anonymous");
        session.set_active_tab("tab-1");
        assert_eq!(session.active_tab(), Some("tab-1"));

        // Unknown data keys survive alongside active_tab
        session.data["window_geometry"] = serde_json::json!([800, 600]);
        session.set_active_tab("tab-2");
        assert_eq!(session.active_tab(), Some("tab-2"));
        assert_eq!(session.data["window_geometry"], serde_json::json!([800, 600]));
    }

    #[test]
    fn test_new_tab_seeds_history_with_initial_url() {
        let tab = Tab::new("session-1", "anonymous", "https://example.com");
        assert_eq!(tab.history, ["https://example.com"]);
        assert_eq!(tab.url, "https://example.com");
        assert_eq!(tab.scroll_position, 0);
        assert_eq!(tab.zoom_factor, 1.0);
    }

    #[test]
    fn test_visit_appends_history() {
        let mut tab = Tab::new("session-1", "anonymous", "https://a.example");
        tab.visit("https://b.example");
        tab.visit("https://c.example");
        assert_eq!(tab.url, "https://c.example");
        assert_eq!(
            tab.history,
            ["https://a.example", "https://b.example", "https://c.example"]
        );
    }

    #[test]
    fn test_truncate_history_keeps_newest() {
        let mut tab = Tab::new("session-1", "anonymous", "https://0.example");
        for i in 1..10 {
            tab.visit(format!("https://{}.example", i));
        }
        tab.truncate_history(3);
        assert_eq!(
            tab.history,
            ["https://7.example", "https://8.example", "https://9.example"]
        );
    }
}
