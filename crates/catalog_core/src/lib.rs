//! Catalog core: record model and the pure merge, ordering and sharding stages.
mod merge;
mod order;
mod record;
mod search;
mod shard;

pub use merge::{merge, MergeOutcome};
pub use order::{dedupe_and_sort, upload_timestamp, DedupeOutcome};
pub use record::{Preservation, Record};
pub use search::{prefix2, prefix3, search_key, PREFIX_LEN, PREFIX_SENTINEL};
pub use shard::{
    bucket_id, build_tree, BuiltTree, OutputTree, ShardError, ShardParams, TreeStats,
    BUCKET_COUNT, DETAIL_DIR, INDEX_DIR, LIST_DIR, LOOKUP_FILE, META_FILE,
};
