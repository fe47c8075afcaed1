//! User style-profile handler

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use anchor_common::errors::{AppError, Result};
use anchor_common::profile::UserProfile;

/// Profile upsert body. `UserProfile` already carries serde defaults for
/// every field except `user_id`.
#[derive(Debug, Deserialize, Validate)]
pub struct ProfileBody {
    #[validate(length(min = 1, max = 255))]
    pub user_id: String,

    #[serde(flatten)]
    pub rest: ProfileFields,
}

#[derive(Debug, Deserialize)]
pub struct ProfileFields {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub output_style: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub user_id: String,
    pub style_prompt: String,
}

/// Store or replace a user's style preferences
pub async fn upsert_profile(
    State(state): State<AppState>,
    Json(body): Json<ProfileBody>,
) -> Result<Json<ProfileResponse>> {
    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let mut profile = UserProfile::default_for(&body.user_id);
    if let Some(language) = body.rest.language {
        profile.language = language;
    }
    if let Some(output_style) = body.rest.output_style {
        profile.output_style = output_style;
    }
    if let Some(format) = body.rest.format {
        profile.format = format;
    }
    if let Some(tone) = body.rest.tone {
        profile.tone = tone;
    }

    let style_prompt = profile.style_prompt();
    state.profiles.upsert(profile);

    tracing::info!(user_id = %body.user_id, "Profile updated");

    Ok(Json(ProfileResponse {
        user_id: body.user_id,
        style_prompt,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_body_deserializes() {
        let body: ProfileBody = serde_json::from_value(serde_json::json!({
            "user_id": "u1",
            "language": "de"
        }))
        .unwrap();
        assert_eq!(body.rest.language.as_deref(), Some("de"));
        assert!(body.rest.tone.is_none());
        assert!(body.validate().is_ok());
    }
}
