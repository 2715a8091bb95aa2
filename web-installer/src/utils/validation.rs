// Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Result<&'static Regex, String> {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .ok_or_else(|| format!("Internal error: failed to compile validation regex: {}", pattern))
}

fn email_re() -> Result<&'static Regex, String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(
        &RE,
        r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]{0,61}[A-Za-z0-9])?)+$",
    )
}

fn person_name_re() -> Result<&'static Regex, String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, r"^[\p{L}\p{N} '\-.]+$")
}

fn fingerprint_re() -> Result<&'static Regex, String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, r"^[A-F0-9]{40}([A-F0-9]{24})?$")
}

/// Validate an email address (server key identity, usernames).
pub fn validate_email(email: &str) -> Result<(), String> {
    let s = email.trim();
    if s.is_empty() {
        return Err("The email address should not be empty.".to_string());
    }
    if s.len() > 255 {
        return Err("The email address should be 255 characters in length maximum.".to_string());
    }
    if !email_re()?.is_match(s) {
        return Err("The email address should be a valid email address.".to_string());
    }
    Ok(())
}

/// Usernames are email addresses.
pub fn validate_username(username: &str) -> Result<(), String> {
    validate_email(username).map_err(|e| e.replace("The email address", "The username"))
}

/// First / last name rules.
pub fn validate_person_name(name: &str) -> Result<(), String> {
    let s = name.trim();
    if s.is_empty() {
        return Err("The name should not be empty.".to_string());
    }
    if s.chars().count() > 255 {
        return Err("The name should be 255 characters in length maximum.".to_string());
    }
    if !person_name_re()?.is_match(s) {
        return Err("The name contains invalid characters.".to_string());
    }
    Ok(())
}

/// Normalize a GPG fingerprint: uppercase, no whitespace. Returns `None` unless the result is a
/// 40 hex-digit v4 or 64 hex-digit v5 fingerprint.
pub fn normalize_fingerprint(raw: &str) -> Option<String> {
    let fpr: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    if fingerprint_re().is_ok_and(|re| re.is_match(&fpr)) {
        Some(fpr)
    } else {
        None
    }
}

/// Validate database name (MySQL)
pub fn validate_mysql_database_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Database name cannot be empty".to_string());
    }

    if name.len() > 64 {
        return Err("Database name cannot exceed 64 characters".to_string());
    }

    if name.ends_with(' ') {
        return Err("Database name cannot end with spaces".to_string());
    }

    let invalid_chars = ['/', '\\', '.', '\0'];
    if name.chars().any(|c| invalid_chars.contains(&c)) {
        return Err("Database name contains invalid characters".to_string());
    }

    Ok(())
}
