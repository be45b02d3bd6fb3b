// Input bounds for participant-supplied strings.
//
// Heavy sanitization (HTML escaping, rate limiting) is owned by the edge
// in front of this service; these checks only keep obviously broken
// payloads out of the store. The ledger never truncates — overlong input
// is rejected, not clipped.

use crate::error::{ChatError, ErrorCode};

pub const MAX_USERNAME_CHARS: usize = 50;
pub const MAX_TEXT_CHARS: usize = 2000;
pub const MAX_ROOM_NAME_CHARS: usize = 2000;
pub const MAX_ROOM_ID_CHARS: usize = 20;

/// Trim and bound a display name. Empty or overlong names are invalid.
pub fn validate_username(raw: &str) -> Result<&str, ChatError> {
    validate_bounded(raw, MAX_USERNAME_CHARS, "username")
}

/// Trim and bound a room display name.
pub fn validate_room_name(raw: &str) -> Result<&str, ChatError> {
    validate_bounded(raw, MAX_ROOM_NAME_CHARS, "room name")
}

/// Trim and bound a room identifier as supplied by a client.
pub fn validate_room_id(raw: &str) -> Result<&str, ChatError> {
    validate_bounded(raw, MAX_ROOM_ID_CHARS, "room id")
}

/// Bound message text. Empty text is allowed here — the ledger decides
/// whether an empty body is acceptable based on the attachment.
pub fn validate_text(raw: &str) -> Result<&str, ChatError> {
    let trimmed = raw.trim();
    if trimmed.chars().count() > MAX_TEXT_CHARS {
        return Err(ChatError::new(
            ErrorCode::InvalidInput,
            format!("message text exceeds {MAX_TEXT_CHARS} characters"),
        ));
    }
    check_no_control_chars(trimmed, "message text")?;
    Ok(trimmed)
}

fn validate_bounded<'a>(
    raw: &'a str,
    max_chars: usize,
    field: &'static str,
) -> Result<&'a str, ChatError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ChatError::new(ErrorCode::InvalidInput, format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max_chars {
        return Err(ChatError::new(
            ErrorCode::InvalidInput,
            format!("{field} exceeds {max_chars} characters"),
        ));
    }
    check_no_control_chars(trimmed, field)?;
    Ok(trimmed)
}

fn check_no_control_chars(value: &str, field: &'static str) -> Result<(), ChatError> {
    if value.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(ChatError::new(
            ErrorCode::InvalidInput,
            format!("{field} contains control characters"),
        ));
    }
    Ok(())
}
