//! Derived-value helpers used by the portal registry.

use crate::core::{Record, SqlValue};

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human readable size with 1024-based units and at most two decimals,
/// e.g. `0 Bytes`, `1.5 KB`, `2 MB`.
pub fn format_file_size(bytes: f64) -> String {
    if bytes <= 0.0 || !bytes.is_finite() {
        return "0 Bytes".to_string();
    }
    let exp = ((bytes.ln() / 1024f64.ln()).floor() as usize).min(SIZE_UNITS.len() - 1);
    let scaled = bytes / 1024f64.powi(exp as i32);
    let rounded = (scaled * 100.0).round() / 100.0;
    format!("{} {}", rounded, SIZE_UNITS[exp])
}

/// `H:M:S` found anywhere in the text, as seconds. Anything else is 0.
pub fn parse_duration_seconds(text: &str) -> i64 {
    text.split(|c: char| !(c.is_ascii_digit() || c == ':'))
        .find_map(|token| {
            let parts: Vec<&str> = token.split(':').collect();
            // Take the first three numeric groups, like a leftmost regex match
            parts.windows(3).find_map(|w| {
                let h: i64 = w[0].parse().ok()?;
                let m: i64 = w[1].parse().ok()?;
                let s: i64 = w[2].parse().ok()?;
                Some(h * 3600 + m * 60 + s)
            })
        })
        .unwrap_or(0)
}

/// First ten characters of a name, uppercased. Empty names give `SCHOOL`.
pub fn school_code(name: &str) -> String {
    let code: String = name.chars().take(10).collect::<String>().to_uppercase();
    if code.is_empty() {
        "SCHOOL".to_string()
    } else {
        code
    }
}

fn text_of(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Text(s) => Some(s.clone()),
        other => other.to_pg_text(),
    }
}

// Converters below follow the registry's DeriveFn signature.

pub(crate) fn size_formatted(_: &SqlValue, raw: &Record) -> Result<SqlValue, String> {
    let bytes = raw.value("size").as_f64().unwrap_or(0.0);
    Ok(SqlValue::Text(format_file_size(bytes)))
}

pub(crate) fn legacy_s3_key(_: &SqlValue, raw: &Record) -> Result<SqlValue, String> {
    let id = raw
        .legacy_id()
        .ok_or_else(|| "file record has no id".to_string())?;
    let name = text_of(raw.value("name")).unwrap_or_default();
    Ok(SqlValue::Text(format!("legacy/{}/{}", id, name)))
}

pub(crate) fn duration_seconds(_: &SqlValue, raw: &Record) -> Result<SqlValue, String> {
    let seconds = text_of(raw.value("duration"))
        .map(|d| parse_duration_seconds(&d))
        .unwrap_or(0);
    Ok(SqlValue::I64(seconds))
}

pub(crate) fn unit_code(_: &SqlValue, raw: &Record) -> Result<SqlValue, String> {
    let name = text_of(raw.value("name")).unwrap_or_default();
    Ok(SqlValue::Text(school_code(&name)))
}

pub(crate) fn stage_description(_: &SqlValue, raw: &Record) -> Result<SqlValue, String> {
    let name = text_of(raw.value("name")).unwrap_or_default();
    Ok(SqlValue::Text(format!("Estágio educacional: {}", name)))
}

pub(crate) fn period_name(value: &SqlValue, _: &Record) -> Result<SqlValue, String> {
    match text_of(value) {
        Some(text) if !text.is_empty() => Ok(SqlValue::Text(text)),
        _ => Ok(SqlValue::Text("Período Educacional".to_string())),
    }
}
