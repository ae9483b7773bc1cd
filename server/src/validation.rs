use crate::error::ApiError;

/// Maximum text length for speak requests
const MAX_TEXT_LENGTH: usize = 5000;
/// Maximum length of a voice id override
const MAX_VOICE_ID_LENGTH: usize = 64;

/// Validate a speak request
pub fn validate_speak_request(text: &str, voice: Option<&str>) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    if let Some(voice) = voice {
        if !is_valid_voice_id(voice) {
            return Err(ApiError::InvalidInput(format!(
                "Invalid voice id: {}. Expected up to {} letters, digits, '-' or '_'",
                voice, MAX_VOICE_ID_LENGTH
            )));
        }
    }

    Ok(())
}

/// Voice ids end up in the request path, so only URL-safe characters pass.
fn is_valid_voice_id(voice: &str) -> bool {
    !voice.is_empty()
        && voice.len() <= MAX_VOICE_ID_LENGTH
        && voice
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
