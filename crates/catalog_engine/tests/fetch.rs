mod common;

use std::time::Duration;

use catalog_engine::{
    fetch_all, fetch_source, CancellationToken, DefaultNormalizer, Dialect, FailureKind,
    FetchEvent, FetchSettings, ReqwestPageClient, SourceStatus,
};
use common::{
    doodstream_page, fast_source, init_logging, item, lulustream_page, TestSink, LIST_PATH,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> ReqwestPageClient {
    ReqwestPageClient::new(FetchSettings::default()).unwrap()
}

async fn mount_page(server: &MockServer, route: &str, page: u32, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn ids(records: &[catalog_core::Record]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn fetches_every_page_and_keeps_page_order() {
    init_logging();
    let server = MockServer::start().await;
    mount_page(
        &server,
        LIST_PATH,
        1,
        doodstream_page(3, vec![item("a1", "2024-01-01"), item("a2", "2024-01-02")]),
    )
    .await;
    // Page 2 answers last so completion order differs from page order.
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(doodstream_page(3, vec![item("b1", "2024-01-03")]))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;
    mount_page(&server, LIST_PATH, 3, doodstream_page(3, vec![item("c1", "2024-01-04")])).await;

    let source = fast_source("dood", Dialect::Doodstream, &server.uri(), LIST_PATH);
    let sink = TestSink::new();
    let outcome = fetch_source(
        &client(),
        &DefaultNormalizer,
        &source,
        &CancellationToken::new(),
        &sink,
    )
    .await;

    assert_eq!(outcome.status, SourceStatus::Complete);
    assert_eq!(outcome.total_pages, 3);
    assert_eq!(outcome.pages_fetched, 3);
    assert_eq!(ids(&outcome.records), vec!["a1", "a2", "b1", "c1"]);
    assert!(outcome.records.iter().all(|r| r.source == "dood"));

    let fetched = sink
        .take()
        .into_iter()
        .filter(|e| matches!(e, FetchEvent::PageFetched { .. }))
        .count();
    assert_eq!(fetched, 3);
}

#[tokio::test]
async fn sends_credential_and_page_size() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("key", "secret"))
        .and(query_param("per_page", "2"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(doodstream_page(1, vec![item("x", "")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let source = fast_source("dood", Dialect::Doodstream, &server.uri(), LIST_PATH);
    let outcome = fetch_source(
        &client(),
        &DefaultNormalizer,
        &source,
        &CancellationToken::new(),
        &TestSink::new(),
    )
    .await;

    assert_eq!(ids(&outcome.records), vec!["x"]);
}

#[tokio::test]
async fn first_page_failure_contributes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let source = fast_source("dood", Dialect::Doodstream, &server.uri(), LIST_PATH);
    let sink = TestSink::new();
    let outcome = fetch_source(
        &client(),
        &DefaultNormalizer,
        &source,
        &CancellationToken::new(),
        &sink,
    )
    .await;

    assert_eq!(outcome.status, SourceStatus::Failed);
    assert!(outcome.records.is_empty());
    match sink.take().as_slice() {
        [FetchEvent::PageDropped { page, error, .. }] => {
            assert_eq!(*page, 1);
            assert_eq!(error.kind, FailureKind::HttpStatus(500));
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn failing_page_is_dropped_without_losing_the_rest() {
    let server = MockServer::start().await;
    mount_page(&server, LIST_PATH, 1, doodstream_page(3, vec![item("a1", "")])).await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;
    mount_page(&server, LIST_PATH, 3, doodstream_page(3, vec![item("c1", "")])).await;

    let source = fast_source("dood", Dialect::Doodstream, &server.uri(), LIST_PATH);
    let outcome = fetch_source(
        &client(),
        &DefaultNormalizer,
        &source,
        &CancellationToken::new(),
        &TestSink::new(),
    )
    .await;

    assert_eq!(outcome.status, SourceStatus::Partial);
    assert_eq!(outcome.pages_fetched, 2);
    assert_eq!(outcome.pages_dropped, 1);
    assert_eq!(ids(&outcome.records), vec!["a1", "c1"]);
}

#[tokio::test]
async fn rate_limited_page_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, LIST_PATH, 1, doodstream_page(1, vec![item("a1", "")])).await;

    let source = fast_source("dood", Dialect::Doodstream, &server.uri(), LIST_PATH);
    let outcome = fetch_source(
        &client(),
        &DefaultNormalizer,
        &source,
        &CancellationToken::new(),
        &TestSink::new(),
    )
    .await;

    assert_eq!(outcome.status, SourceStatus::Complete);
    assert_eq!(ids(&outcome.records), vec!["a1"]);
}

#[tokio::test]
async fn malformed_page_is_not_retried() {
    let server = MockServer::start().await;
    mount_page(&server, LIST_PATH, 1, doodstream_page(2, vec![item("a1", "")])).await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let source = fast_source("dood", Dialect::Doodstream, &server.uri(), LIST_PATH);
    let sink = TestSink::new();
    let outcome = fetch_source(
        &client(),
        &DefaultNormalizer,
        &source,
        &CancellationToken::new(),
        &sink,
    )
    .await;

    assert_eq!(outcome.status, SourceStatus::Partial);
    assert_eq!(ids(&outcome.records), vec!["a1"]);
    let dropped: Vec<FailureKind> = sink
        .take()
        .into_iter()
        .filter_map(|e| match e {
            FetchEvent::PageDropped { error, .. } => Some(error.kind),
            _ => None,
        })
        .collect();
    assert_eq!(dropped, vec![FailureKind::Malformed]);
}

#[tokio::test]
async fn lulustream_page_count_and_fields_are_read() {
    let server = MockServer::start().await;
    let mut first = item("l1", "2024-02-01 10:00:00");
    first.as_object_mut().unwrap().remove("views");
    first["file_size"] = serde_json::json!("2048");
    first["file_views"] = serde_json::json!(41);
    first["player_img"] = serde_json::json!("https://img.example/l1.jpg");
    mount_page(&server, LIST_PATH, 1, lulustream_page(2, vec![first])).await;
    mount_page(&server, LIST_PATH, 2, lulustream_page(2, vec![item("l2", "")])).await;

    let source = fast_source("lulu", Dialect::Lulustream, &server.uri(), LIST_PATH);
    let outcome = fetch_source(
        &client(),
        &DefaultNormalizer,
        &source,
        &CancellationToken::new(),
        &TestSink::new(),
    )
    .await;

    assert_eq!(outcome.total_pages, 2);
    assert_eq!(ids(&outcome.records), vec!["l1", "l2"]);
    let l1 = &outcome.records[0];
    assert_eq!(l1.size_bytes, 2048);
    assert_eq!(l1.views, 41);
    assert_eq!(l1.thumbnail_url, "https://img.example/l1.jpg");
}

#[tokio::test]
async fn source_deadline_keeps_pages_already_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(doodstream_page(6, vec![item("p", "")]))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;

    let mut source = fast_source("dood", Dialect::Doodstream, &server.uri(), LIST_PATH);
    source.concurrency = 1;
    source.deadline = Duration::from_millis(400);
    let outcome = fetch_source(
        &client(),
        &DefaultNormalizer,
        &source,
        &CancellationToken::new(),
        &TestSink::new(),
    )
    .await;

    assert_eq!(outcome.status, SourceStatus::Partial);
    assert!(outcome.pages_fetched >= 1);
    assert!(outcome.pages_fetched < 6);
    assert_eq!(outcome.pages_fetched + outcome.pages_dropped, 6);
    assert_eq!(outcome.records.len(), outcome.pages_fetched);
}

#[tokio::test]
async fn global_deadline_discards_unfinished_sources() {
    init_logging();
    let server = MockServer::start().await;
    mount_page(&server, "/fast", 1, doodstream_page(1, vec![item("f1", "")])).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(doodstream_page(1, vec![item("s1", "")]))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let sources = vec![
        fast_source("slow", Dialect::Doodstream, &server.uri(), "/slow"),
        fast_source("fast", Dialect::Doodstream, &server.uri(), "/fast"),
    ];
    let settings = FetchSettings {
        request_timeout: Duration::from_millis(600),
        ..FetchSettings::default()
    };
    let client = ReqwestPageClient::new(settings).unwrap();
    let sink = TestSink::new();
    let outcomes = fetch_all(
        &client,
        &DefaultNormalizer,
        &sources,
        Duration::from_millis(300),
        &CancellationToken::new(),
        &sink,
    )
    .await;

    let names: Vec<&str> = outcomes.iter().map(|o| o.source.as_str()).collect();
    assert_eq!(names, vec!["slow", "fast"]);
    assert_eq!(outcomes[0].status, SourceStatus::TimedOut);
    assert!(outcomes[0].records.is_empty());
    assert_eq!(outcomes[1].status, SourceStatus::Complete);
    assert_eq!(ids(&outcomes[1].records), vec!["f1"]);

    let finished = sink
        .take()
        .into_iter()
        .filter(|e| matches!(e, FetchEvent::SourceFinished { .. }))
        .count();
    assert_eq!(finished, 2);
}

#[tokio::test]
async fn cancelled_run_schedules_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(doodstream_page(1, vec![])))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let sources = vec![fast_source("dood", Dialect::Doodstream, &server.uri(), LIST_PATH)];
    let outcomes = fetch_all(
        &client(),
        &DefaultNormalizer,
        &sources,
        Duration::from_secs(5),
        &cancel,
        &TestSink::new(),
    )
    .await;

    assert_eq!(outcomes[0].status, SourceStatus::Cancelled);
    assert!(outcomes[0].records.is_empty());
}
