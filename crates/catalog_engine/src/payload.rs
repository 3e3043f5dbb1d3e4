//! Per-dialect decoding of upstream file-list pages into one uniform shape.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::source::Dialect;
use crate::types::{FailureKind, FetchError, PageNumber};

/// Upstream item with dialect-specific field names already mapped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawItem {
    pub id: String,
    pub title: String,
    /// Seconds as a number, or `H:M:S` text.
    pub length: Option<Value>,
    /// Bytes as a number, or text with a unit such as `608.00 MB`.
    pub size: Option<Value>,
    pub views: Option<Value>,
    pub uploaded: String,
    pub thumbnail: Option<String>,
    pub splash: Option<String>,
    pub download_url: Option<String>,
    pub embed_url: Option<String>,
}

/// Uniform `{status, total_pages, items}` view of one page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageEnvelope {
    pub status: i64,
    pub total_pages: PageNumber,
    pub items: Vec<RawItem>,
    /// Items that could not be decoded and were left out.
    pub skipped_items: usize,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Value,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    result: Option<ResultBody>,
}

#[derive(Deserialize)]
struct ResultBody {
    #[serde(default)]
    total_pages: Option<Value>,
    #[serde(default)]
    pages: Option<Value>,
    #[serde(default)]
    files: Vec<Value>,
}

#[derive(Deserialize)]
struct DoodstreamItem {
    #[serde(default, alias = "filecode")]
    file_code: String,
    #[serde(default, alias = "file_title")]
    title: String,
    #[serde(default, alias = "file_length")]
    length: Option<Value>,
    #[serde(default)]
    size: Option<Value>,
    #[serde(default)]
    views: Option<Value>,
    #[serde(default)]
    uploaded: Option<Value>,
    #[serde(default)]
    single_img: Option<String>,
    #[serde(default)]
    splash_img: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    protected_embed: Option<String>,
}

impl From<DoodstreamItem> for RawItem {
    fn from(item: DoodstreamItem) -> Self {
        let thumbnail = non_empty(item.single_img.clone()).or_else(|| non_empty(item.splash_img.clone()));
        let splash = non_empty(item.splash_img).or_else(|| non_empty(item.single_img));
        Self {
            id: item.file_code.trim().to_string(),
            title: item.title,
            length: item.length,
            size: item.size,
            views: item.views,
            uploaded: text(item.uploaded),
            thumbnail,
            splash,
            download_url: non_empty(item.download_url),
            embed_url: non_empty(item.protected_embed),
        }
    }
}

#[derive(Deserialize)]
struct LulustreamItem {
    #[serde(default, alias = "filecode")]
    file_code: String,
    #[serde(default, alias = "file_title")]
    title: String,
    #[serde(default, alias = "file_length")]
    length: Option<Value>,
    #[serde(default, alias = "size")]
    file_size: Option<Value>,
    #[serde(default)]
    views: Option<Value>,
    #[serde(default)]
    file_views: Option<Value>,
    #[serde(default)]
    uploaded: Option<Value>,
    #[serde(default)]
    player_img: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    protected_embed: Option<String>,
}

impl From<LulustreamItem> for RawItem {
    fn from(item: LulustreamItem) -> Self {
        let player_img = non_empty(item.player_img);
        Self {
            id: item.file_code.trim().to_string(),
            title: item.title,
            length: item.length,
            size: item.file_size,
            views: item.views.or(item.file_views),
            uploaded: text(item.uploaded),
            thumbnail: player_img.clone(),
            splash: player_img,
            download_url: non_empty(item.download_url),
            embed_url: non_empty(item.protected_embed),
        }
    }
}

/// Decode one response body according to the source's dialect.
///
/// A body that is not JSON, lacks a `result` object, or reports a status
/// other than 200 is an error. Individual items that fail to decode are
/// skipped and counted.
pub fn decode_page(dialect: Dialect, body: &[u8]) -> Result<PageEnvelope, FetchError> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|err| FetchError::new(FailureKind::Malformed, err.to_string()))?;

    let status = loose_i64(&envelope.status).unwrap_or(0);
    if status != 200 {
        return Err(FetchError::new(
            FailureKind::ApiStatus(status),
            envelope.msg.unwrap_or_else(|| "unexpected api status".into()),
        ));
    }
    let result = envelope
        .result
        .ok_or_else(|| FetchError::new(FailureKind::Malformed, "missing result object"))?;

    let total_pages = match dialect {
        Dialect::Doodstream => result.total_pages.as_ref().or(result.pages.as_ref()),
        Dialect::Lulustream => result.pages.as_ref().or(result.total_pages.as_ref()),
    }
    .and_then(loose_u64)
    .map(|pages| PageNumber::try_from(pages).unwrap_or(PageNumber::MAX))
    .unwrap_or(1);

    let (items, skipped_items) = match dialect {
        Dialect::Doodstream => decode_items::<DoodstreamItem>(result.files),
        Dialect::Lulustream => decode_items::<LulustreamItem>(result.files),
    };

    Ok(PageEnvelope {
        status,
        total_pages,
        items,
        skipped_items,
    })
}

fn decode_items<T>(files: Vec<Value>) -> (Vec<RawItem>, usize)
where
    T: DeserializeOwned + Into<RawItem>,
{
    let mut skipped = 0;
    let items = files
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item.into()),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    (items, skipped)
}

/// Number from a JSON number or numeric string.
pub(crate) fn loose_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        _ => None,
    }
}

fn loose_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
