use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::record::Record;
use crate::search::{prefix2, prefix3, search_key, PREFIX_LEN};

/// Size of the hash-bucket id space. Fixed regardless of record count.
pub const BUCKET_COUNT: usize = 256;

pub const DETAIL_DIR: &str = "detail";
pub const INDEX_DIR: &str = "index";
pub const LIST_DIR: &str = "list";
pub const LOOKUP_FILE: &str = "lookup_shard.json";
pub const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardParams {
    /// Records per paginated list file.
    pub per_page: usize,
    /// Largest level-2 prefix bucket still written as one flat file.
    pub prefix_ceiling: usize,
}

impl Default for ShardParams {
    fn default() -> Self {
        Self {
            per_page: 200,
            prefix_ceiling: 500,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("invalid shard parameters: {0}")]
    InvalidParams(String),
    #[error("record at position {position} has an empty identity key")]
    MissingIdentity { position: usize },
    #[error("failed to serialize {path}: {message}")]
    Serialize { path: String, message: String },
}

/// Hash bucket of an identity key: first byte of its SHA-256, as two hex digits.
pub fn bucket_id(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:02x}", digest[0])
}

/// Complete output tree held in memory: relative `/`-separated path to file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl OutputTree {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Files in path order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files
            .iter()
            .map(|(path, bytes)| (path.as_str(), bytes.as_slice()))
    }

    /// Paths directly or indirectly below `dir`.
    pub fn paths_under<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.files
            .keys()
            .map(String::as_str)
            .filter(move |path| {
                path.strip_prefix(dir)
                    .is_some_and(|rest| rest.starts_with('/'))
            })
    }

    fn insert<T: Serialize>(&mut self, path: String, value: &T) -> Result<(), ShardError> {
        let bytes = serde_json::to_vec(value).map_err(|err| ShardError::Serialize {
            path: path.clone(),
            message: err.to_string(),
        })?;
        self.files.insert(path, bytes);
        Ok(())
    }

    fn insert_pretty<T: Serialize>(&mut self, path: String, value: &T) -> Result<(), ShardError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|err| ShardError::Serialize {
            path: path.clone(),
            message: err.to_string(),
        })?;
        self.files.insert(path, bytes);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreeStats {
    pub records: usize,
    pub bucket_files: usize,
    pub search_files: usize,
    pub split_prefixes: usize,
    pub list_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTree {
    pub tree: OutputTree,
    pub stats: TreeStats,
}

/// Full record plus its position in the list files.
#[derive(Serialize)]
struct DetailEntry<'a> {
    #[serde(flatten)]
    record: &'a Record,
    page: usize,
    index: usize,
}

/// Lightweight projection used by the prefix search files.
#[derive(Serialize)]
struct SearchEntry<'a> {
    id: &'a str,
    title: &'a str,
    duration_secs: u64,
    thumbnail_url: &'a str,
    splash_url: &'a str,
    views: u64,
    uploaded: &'a str,
    page: usize,
}

struct SearchItem<'a> {
    level3: String,
    entry: SearchEntry<'a>,
}

/// Item of a list page, shaped like the upstream file-list response.
#[derive(Serialize)]
struct ListEntry<'a> {
    file_code: &'a str,
    title: &'a str,
    download_url: &'a str,
    single_img: &'a str,
    length: String,
    views: String,
    uploaded: &'a str,
}

#[derive(Serialize)]
struct ListPage<'a> {
    msg: &'static str,
    server_time: &'a str,
    status: u16,
    result: ListResult<'a>,
}

#[derive(Serialize)]
struct ListResult<'a> {
    total_pages: usize,
    files: Vec<ListEntry<'a>>,
    results_total: String,
    results: usize,
}

#[derive(Serialize)]
struct Meta<'a> {
    total: usize,
    per_page: usize,
    prefix_len: usize,
    prefix_ceiling: usize,
    bucket_space: usize,
    bucket_files: usize,
    search_files: usize,
    split_prefixes: usize,
    list_pages: usize,
    lookup_file: &'static str,
    generated_at: &'a str,
}

/// Partition the ordered records into the complete output tree.
///
/// The result is a pure function of `records`, `params` and `generated_at`;
/// every file is produced from scratch.
pub fn build_tree(
    records: &[Record],
    params: &ShardParams,
    generated_at: &str,
) -> Result<BuiltTree, ShardError> {
    if params.per_page == 0 {
        return Err(ShardError::InvalidParams("per_page must be at least 1".into()));
    }
    if params.prefix_ceiling == 0 {
        return Err(ShardError::InvalidParams(
            "prefix_ceiling must be at least 1".into(),
        ));
    }

    let mut buckets: BTreeMap<String, Vec<DetailEntry>> = BTreeMap::new();
    let mut lookup: BTreeMap<&str, String> = BTreeMap::new();
    let mut prefixes: BTreeMap<String, Vec<SearchItem>> = BTreeMap::new();

    for (position, record) in records.iter().enumerate() {
        if !record.has_identity() {
            return Err(ShardError::MissingIdentity { position });
        }
        let page = position / params.per_page + 1;
        let index = position % params.per_page;

        let bucket = bucket_id(&record.id);
        lookup.insert(record.id.as_str(), bucket.clone());
        buckets.entry(bucket).or_default().push(DetailEntry {
            record,
            page,
            index,
        });

        let key = search_key(&record.title);
        prefixes.entry(prefix2(&key)).or_default().push(SearchItem {
            level3: prefix3(&key),
            entry: SearchEntry {
                id: &record.id,
                title: &record.title,
                duration_secs: record.duration_secs,
                thumbnail_url: &record.thumbnail_url,
                splash_url: &record.splash_url,
                views: record.views,
                uploaded: &record.uploaded,
                page,
            },
        });
    }

    let mut tree = OutputTree::default();
    let mut stats = TreeStats {
        records: records.len(),
        bucket_files: buckets.len(),
        ..TreeStats::default()
    };

    for (bucket, entries) in &buckets {
        tree.insert(format!("{DETAIL_DIR}/{bucket}.json"), entries)?;
    }
    tree.insert(LOOKUP_FILE.to_string(), &lookup)?;

    for (level2, items) in prefixes {
        if items.len() <= params.prefix_ceiling {
            let entries: Vec<&SearchEntry> = items.iter().map(|item| &item.entry).collect();
            tree.insert(format!("{INDEX_DIR}/{level2}.json"), &entries)?;
            stats.search_files += 1;
            continue;
        }

        stats.split_prefixes += 1;
        let mut level3_buckets: BTreeMap<&str, Vec<&SearchEntry>> = BTreeMap::new();
        for item in &items {
            level3_buckets
                .entry(item.level3.as_str())
                .or_default()
                .push(&item.entry);
        }
        for (level3, entries) in level3_buckets {
            tree.insert(format!("{INDEX_DIR}/{level2}/{level3}.json"), &entries)?;
            stats.search_files += 1;
        }
    }

    let total_pages = records.len().div_ceil(params.per_page);
    let results_total = records.len().to_string();
    for (page_index, chunk) in records.chunks(params.per_page).enumerate() {
        let files: Vec<ListEntry> = chunk
            .iter()
            .map(|record| ListEntry {
                file_code: &record.id,
                title: &record.title,
                download_url: &record.download_url,
                single_img: &record.thumbnail_url,
                length: record.duration_secs.to_string(),
                views: record.views.to_string(),
                uploaded: &record.uploaded,
            })
            .collect();
        let page = ListPage {
            msg: "OK",
            server_time: generated_at,
            status: 200,
            result: ListResult {
                total_pages,
                results: files.len(),
                files,
                results_total: results_total.clone(),
            },
        };
        tree.insert(format!("{LIST_DIR}/{}.json", page_index + 1), &page)?;
    }
    stats.list_pages = total_pages;

    let meta = Meta {
        total: stats.records,
        per_page: params.per_page,
        prefix_len: PREFIX_LEN,
        prefix_ceiling: params.prefix_ceiling,
        bucket_space: BUCKET_COUNT,
        bucket_files: stats.bucket_files,
        search_files: stats.search_files,
        split_prefixes: stats.split_prefixes,
        list_pages: stats.list_pages,
        lookup_file: LOOKUP_FILE,
        generated_at,
    };
    tree.insert_pretty(META_FILE.to_string(), &meta)?;

    Ok(BuiltTree { tree, stats })
}
