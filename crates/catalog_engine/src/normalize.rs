use serde_json::Value;

use catalog_core::{Preservation, Record};

use crate::payload::{loose_u64, RawItem};
use crate::source::{SourceConfig, UrlTemplates};

const MIB: u64 = 1024 * 1024;
const FALLBACK_CATEGORY: &str = "Video Terbaru";

/// Maps one decoded upstream item onto the canonical record.
///
/// Implementations must be pure: the result may depend only on the item
/// and the source, never on other items or their processing order.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: RawItem, source: &SourceConfig) -> Record;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNormalizer;

impl Normalizer for DefaultNormalizer {
    fn normalize(&self, raw: RawItem, source: &SourceConfig) -> Record {
        let title = clean_title(&raw.title);
        let duration_secs = raw.length.as_ref().map(parse_duration).unwrap_or(0);
        let size_bytes = raw
            .size
            .as_ref()
            .and_then(parse_size)
            .unwrap_or(duration_secs.saturating_mul(MIB));
        let views = raw.views.as_ref().and_then(loose_u64).unwrap_or(0);
        let templates = &source.templates;
        let id = raw.id;

        let mut record = Record {
            description: describe(&title, &raw.uploaded, size_bytes, duration_secs),
            category: category_for(&title),
            embed_url: raw
                .embed_url
                .unwrap_or_else(|| UrlTemplates::render(templates.embed.as_deref(), &id)),
            download_url: raw
                .download_url
                .unwrap_or_else(|| UrlTemplates::render(templates.download.as_deref(), &id)),
            thumbnail_url: raw
                .thumbnail
                .unwrap_or_else(|| UrlTemplates::render(templates.thumbnail.as_deref(), &id)),
            splash_url: raw
                .splash
                .unwrap_or_else(|| UrlTemplates::render(templates.splash.as_deref(), &id)),
            duration_secs,
            size_bytes,
            views,
            uploaded: raw.uploaded,
            source: source.name.clone(),
            raw_title: raw.title,
            title,
            id,
            preservation: Preservation::Fresh,
            ..Record::default()
        };
        record.refresh_search_key();
        record
    }
}

/// Collapse runs of whitespace and trim.
pub fn clean_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Seconds from a number or `[[H:]M:]S` text; anything unreadable is 0.
pub fn parse_duration(value: &Value) -> u64 {
    if let Some(secs) = loose_u64(value) {
        return secs;
    }
    let Value::String(text) = value else {
        return 0;
    };
    let mut total = 0u64;
    for part in text.trim().split(':') {
        let Ok(unit) = part.trim().parse::<u64>() else {
            return 0;
        };
        total = total.saturating_mul(60).saturating_add(unit);
    }
    total
}

/// Bytes from a number or text such as `608.00 MB`.
pub fn parse_size(value: &Value) -> Option<u64> {
    if let Some(bytes) = loose_u64(value) {
        return Some(bytes);
    }
    let text = value.as_str()?.trim().to_ascii_uppercase();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier = match unit.trim() {
        "" | "B" | "BYTES" => 1u64,
        "KB" => 1024,
        "MB" => MIB,
        "GB" => MIB * 1024,
        "TB" => MIB * MIB,
        _ => return None,
    };
    Some((number * multiplier as f64) as u64)
}

/// First significant word of the title, prefixed with "Video".
pub fn category_for(title: &str) -> String {
    let mut words = title.split_whitespace().peekable();
    if words
        .peek()
        .is_some_and(|first| first.eq_ignore_ascii_case("video"))
    {
        words.next();
    }
    words
        .find(|word| word.chars().count() >= 3 && !word.chars().all(|c| c.is_ascii_digit()))
        .map(|word| format!("Video {}", capitalize(word)))
        .unwrap_or_else(|| FALLBACK_CATEGORY.to_string())
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn describe(title: &str, uploaded: &str, size_bytes: u64, duration_secs: u64) -> String {
    let uploaded = if uploaded.is_empty() { "unknown date" } else { uploaded };
    format!(
        "{title}, uploaded {uploaded}. File size {}, duration {}.",
        format_size(size_bytes),
        format_duration(duration_secs)
    )
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
