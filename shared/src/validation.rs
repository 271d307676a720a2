//! Validation utilities for request fields that the stock rules do not cover

use crate::models::Stage;

/// Longest free-text note accepted on a movement
pub const MAX_NOTES_LEN: usize = 500;

/// Validate optional free-text notes
pub fn validate_notes(notes: Option<&str>) -> Result<(), &'static str> {
    match notes {
        Some(text) if text.chars().count() > MAX_NOTES_LEN => {
            Err("Notes must be at most 500 characters")
        }
        _ => Ok(()),
    }
}

/// Parse a stage name as sent by clients (case-insensitive)
pub fn parse_stage(value: &str) -> Result<Stage, &'static str> {
    value
        .trim()
        .to_ascii_uppercase()
        .parse()
        .map_err(|_| "Stage must be one of CRUDO, SANCOCHADO, ESMALTADO")
}

/// Blank notes are stored as absent
pub fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}
