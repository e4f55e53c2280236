use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Current time in the fixed-width format stored in every timestamp column.
///
/// Fixed width keeps lexical ordering in SQL identical to chronological ordering.
pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Returns true when `timestamp` is missing, unparseable or in the past
pub fn is_expired(timestamp: Option<&str>, now: DateTime<Utc>) -> bool {
    match timestamp.and_then(|t| DateTime::parse_from_rfc3339(t).ok()) {
        Some(at) => at.with_timezone(&Utc) <= now,
        None => true,
    }
}

/// Human readable byte count ("1.5 MB")
pub fn format_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes <= 0 {
        return "0 Bytes".to_string();
    }

    let bytes = bytes as f64;
    let exp = ((bytes.ln() / 1024f64.ln()).floor() as usize).min(UNITS.len() - 1);
    let value = bytes / 1024f64.powi(exp as i32);
    let rounded = (value * 100.0).round() / 100.0;

    format!("{} {}", rounded, UNITS[exp])
}
