use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::AppError;

static PHONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+?[0-9]{10,15}$").unwrap());
static PHONE_NOISE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-().]").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// How a user is addressed in `/api/users/{key}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Id(Uuid),
    Email(String),
    Phone(String),
}

impl Identifier {
    pub fn parse(key: &str) -> Result<Self, AppError> {
        let key = key.trim();

        if let Ok(id) = Uuid::parse_str(key) {
            return Ok(Identifier::Id(id));
        }

        if key.contains('@') {
            return Ok(Identifier::Email(normalize_email(key)));
        }

        normalize_phone(key).map(Identifier::Phone)
    }
}

/// Strips separators and checks for 10 to 15 digits with an optional leading `+`.
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    let phone = PHONE_NOISE.replace_all(raw.trim(), "").into_owned();

    if !PHONE.is_match(&phone) {
        return Err(AppError::bad_request("Invalid phone number"));
    }

    Ok(phone)
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Trimmed, inner whitespace collapsed. Empty input stays empty.
pub fn sanitize(input: &str) -> String {
    SPACES.replace_all(input.trim(), " ").into_owned()
}

pub fn require_text(value: &str, field: &str) -> Result<String, AppError> {
    let value = sanitize(value);

    if value.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required")));
    }

    Ok(value)
}

/// `%needle%` for LIKE filters; wildcards typed by the user are matched literally.
pub fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");

    format!("%{escaped}%")
}
