//! Input validation for API requests.
//!
//! Validators return `Result<(), String>` with a user-facing message. Collect
//! several of them with `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pragmatic email check: local part, @, dotted domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)+$"
    ).unwrap();

    static ref OTP_REGEX: Regex = Regex::new(r"^\d{6}$").unwrap();

    /// Ids are UUIDs generated by the server
    static ref ID_REGEX: Regex = Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    ).unwrap();
}

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_GALLERY_NAME_LENGTH: usize = 100;
pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_DESCRIPTION_LENGTH: usize = 2000;
pub const MAX_MESSAGE_LENGTH: usize = 5000;
pub const MAX_TAGS: usize = 30;
pub const MAX_TAG_LENGTH: usize = 50;

pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(format!(
            "Name is too long (max {} characters)",
            MAX_NAME_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err("Please provide a valid email".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    Ok(())
}

/// Six ASCII digits
pub fn validate_otp(otp: &str) -> Result<(), String> {
    if !OTP_REGEX.is_match(otp) {
        return Err("Please enter a valid 6-digit OTP".to_string());
    }
    Ok(())
}

pub fn validate_gallery_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Gallery name is required".to_string());
    }
    if name.chars().count() > MAX_GALLERY_NAME_LENGTH {
        return Err(format!(
            "Gallery name is too long (max {} characters)",
            MAX_GALLERY_NAME_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("Title cannot be empty".to_string());
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(format!(
            "Title is too long (max {} characters)",
            MAX_TITLE_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_description(description: &str) -> Result<(), String> {
    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(format!(
            "Description is too long (max {} characters)",
            MAX_DESCRIPTION_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_tags(tags: &[String]) -> Result<(), String> {
    if tags.len() > MAX_TAGS {
        return Err(format!("Too many tags (max {})", MAX_TAGS));
    }
    if tags.iter().any(|t| t.chars().count() > MAX_TAG_LENGTH) {
        return Err(format!(
            "Tags must be at most {} characters",
            MAX_TAG_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_message(message: &str) -> Result<(), String> {
    let message = message.trim();
    if message.is_empty() {
        return Err("Message is required".to_string());
    }
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(format!(
            "Message is too long (max {} characters)",
            MAX_MESSAGE_LENGTH
        ));
    }
    Ok(())
}

/// Server-generated resource id
pub fn validate_id(id: &str) -> Result<(), String> {
    if !ID_REGEX.is_match(id) {
        return Err("Invalid id".to_string());
    }
    Ok(())
}
