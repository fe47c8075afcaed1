//! User style-profile provider
//!
//! Turns a stored user profile into an opaque instruction string injected
//! into the drafter's template. Persistence of profiles is out of scope;
//! the in-memory provider is the reference implementation of the seam.

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Stored user preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,

    /// Preferred answer language
    #[serde(default = "default_language")]
    pub language: String,

    /// Output style: concise, detailed, academic
    #[serde(default = "default_style")]
    pub output_style: String,

    /// Output format: markdown, plain
    #[serde(default = "default_format")]
    pub format: String,

    /// Tone: friendly, professional, formal
    #[serde(default = "default_tone")]
    pub tone: String,
}

fn default_language() -> String {
    "en".to_string()
}
fn default_style() -> String {
    "detailed".to_string()
}
fn default_format() -> String {
    "markdown".to_string()
}
fn default_tone() -> String {
    "professional".to_string()
}

impl UserProfile {
    /// Default profile for an unknown user
    pub fn default_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            language: default_language(),
            output_style: default_style(),
            format: default_format(),
            tone: default_tone(),
        }
    }

    /// Compose the instruction string for the drafter template
    pub fn style_prompt(&self) -> String {
        let style = match self.output_style.as_str() {
            "concise" => "Keep the answer brief and to the point.",
            "academic" => "Write rigorously, with precise terminology and thorough citations.",
            _ => "Answer thoroughly, with necessary explanation and examples.",
        };

        let tone = match self.tone.as_str() {
            "friendly" => "Use a warm, approachable tone.",
            "formal" => "Use a formal, serious tone.",
            _ => "Use a professional, objective tone.",
        };

        let mut parts = vec![
            format!("Answer in {}.", self.language),
            style.to_string(),
            tone.to_string(),
        ];

        if self.format == "markdown" {
            parts.push("Format the answer as Markdown.".to_string());
        }

        parts.join(" ")
    }
}

/// Provider of user style prompts
#[async_trait]
pub trait StyleProvider: Send + Sync {
    /// Get the style instruction string for a user
    async fn style_prompt(&self, user_id: &str) -> Result<String>;
}

/// In-memory style provider
#[derive(Default)]
pub struct InMemoryProfiles {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile
    pub fn upsert(&self, profile: UserProfile) {
        self.profiles
            .write()
            .expect("profile lock poisoned")
            .insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl StyleProvider for InMemoryProfiles {
    async fn style_prompt(&self, user_id: &str) -> Result<String> {
        let profiles = self.profiles.read().expect("profile lock poisoned");
        let prompt = profiles
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserProfile::default_for(user_id))
            .style_prompt();
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_user_gets_default_prompt() {
        let provider = InMemoryProfiles::new();
        let prompt = provider.style_prompt("nobody").await.unwrap();
        assert!(prompt.contains("Answer in en."));
        assert!(prompt.contains("Markdown"));
    }

    #[tokio::test]
    async fn test_stored_profile_shapes_prompt() {
        let provider = InMemoryProfiles::new();
        provider.upsert(UserProfile {
            user_id: "u1".into(),
            language: "de".into(),
            output_style: "concise".into(),
            format: "plain".into(),
            tone: "friendly".into(),
        });

        let prompt = provider.style_prompt("u1").await.unwrap();
        assert!(prompt.contains("Answer in de."));
        assert!(prompt.contains("brief"));
        assert!(prompt.contains("warm"));
        assert!(!prompt.contains("Markdown"));
    }
}
