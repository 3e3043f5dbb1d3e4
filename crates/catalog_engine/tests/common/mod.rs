#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use catalog_engine::{Dialect, FetchEvent, ProgressSink, SourceConfig};
use serde_json::{json, Value};

pub const LIST_PATH: &str = "/api/file/list";

#[derive(Default, Clone)]
pub struct TestSink {
    events: Arc<Mutex<Vec<FetchEvent>>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<FetchEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }
}

impl ProgressSink for TestSink {
    fn emit(&self, event: FetchEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Source with short delays so retries and spacing do not slow tests down.
pub fn fast_source(name: &str, dialect: Dialect, base_uri: &str, path: &str) -> SourceConfig {
    let mut source = SourceConfig::new(name, dialect, format!("{base_uri}{path}"), "secret");
    source.per_page = 2;
    source.max_attempts = 3;
    source.concurrency = 2;
    source.request_delay = Duration::ZERO;
    source.backoff_base = Duration::from_millis(10);
    source.rate_limit_backoff = Duration::from_millis(20);
    source.deadline = Duration::from_secs(10);
    source
}

pub fn item(id: &str, uploaded: &str) -> Value {
    json!({
        "file_code": id,
        "title": format!("Title {id}"),
        "length": "60",
        "views": "3",
        "uploaded": uploaded,
    })
}

pub fn doodstream_page(total_pages: u32, items: Vec<Value>) -> Value {
    json!({
        "msg": "OK",
        "status": 200,
        "result": { "total_pages": total_pages, "files": items }
    })
}

pub fn lulustream_page(pages: u32, items: Vec<Value>) -> Value {
    json!({
        "status": 200,
        "result": { "pages": pages, "files": items }
    })
}

pub fn init_logging() {
    engine_logging::initialize_for_tests();
}
