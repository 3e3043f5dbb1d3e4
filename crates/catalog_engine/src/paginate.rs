use std::collections::BTreeMap;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::future::join_all;
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use catalog_core::Record;

use crate::fetch::{PageClient, ProgressSink};
use crate::normalize::Normalizer;
use crate::payload::PageEnvelope;
use crate::source::SourceConfig;
use crate::types::{FailureKind, FetchError, FetchEvent, PageNumber, SourceOutcome, SourceStatus};

/// Fetch one page, retrying within the source's attempt budget.
///
/// Retryable failures back off exponentially; rate-limit responses add
/// `rate_limit_backoff × attempt` on top. Malformed payloads are not retried.
/// Cancellation stops further attempts but never interrupts one in flight.
pub async fn fetch_with_retry(
    client: &dyn PageClient,
    source: &SourceConfig,
    page: PageNumber,
    cancel: &CancellationToken,
) -> Result<PageEnvelope, FetchError> {
    let attempts = source.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::new(FailureKind::Cancelled, "not scheduled"));
        }
        let err = match client.fetch_page(source, page).await {
            Ok(envelope) => return Ok(envelope),
            Err(err) => err,
        };
        if !err.kind.is_retryable() || attempt + 1 >= attempts {
            return Err(err);
        }
        let delay = source.retry_delay(attempt, err.kind == FailureKind::RateLimited);
        engine_debug!(
            "{}: page {} attempt {}/{} failed ({}), retrying in {:?}",
            source.name,
            page,
            attempt + 1,
            attempts,
            err,
            delay
        );
        if !pause(delay, cancel).await {
            return Err(err);
        }
        attempt += 1;
    }
}

/// Fetch every page of one source. Never fails: problems shrink the result.
///
/// Page 1 is fetched first to learn the page count; pages `2..=N` then run
/// with at most `source.concurrency` in flight. When the source deadline or
/// `cancel` fires no new pages are scheduled; pages already in flight finish.
pub async fn fetch_source(
    client: &dyn PageClient,
    normalizer: &dyn Normalizer,
    source: &SourceConfig,
    cancel: &CancellationToken,
    sink: &dyn ProgressSink,
) -> SourceOutcome {
    let source_cancel = cancel.child_token();
    let work = fetch_pages(client, normalizer, source, &source_cancel, sink);
    tokio::pin!(work);

    tokio::select! {
        outcome = &mut work => outcome,
        _ = tokio::time::sleep(source.deadline) => {
            engine_warn!(
                "{}: source deadline of {:?} reached, no further pages scheduled",
                source.name,
                source.deadline
            );
            source_cancel.cancel();
            work.await
        }
    }
}

async fn fetch_pages(
    client: &dyn PageClient,
    normalizer: &dyn Normalizer,
    source: &SourceConfig,
    cancel: &CancellationToken,
    sink: &dyn ProgressSink,
) -> SourceOutcome {
    let first = match fetch_with_retry(client, source, 1, cancel).await {
        Ok(envelope) => envelope,
        Err(error) => {
            sink.emit(FetchEvent::PageDropped {
                source: source.name.clone(),
                page: 1,
                error,
            });
            return SourceOutcome::failed(&source.name);
        }
    };

    let total_pages = first.total_pages.max(1);
    engine_info!("{}: upstream reports {} pages", source.name, total_pages);

    let mut pages: BTreeMap<PageNumber, Vec<Record>> = BTreeMap::new();
    pages.insert(1, normalize_page(normalizer, source, 1, total_pages, first, sink));
    let mut pages_dropped = 0;

    if total_pages > 1 {
        pause(source.request_delay, cancel).await;

        let results: Vec<(PageNumber, Result<Vec<Record>, FetchError>)> =
            stream::iter(2..=total_pages)
                .map(|page| async move {
                    let result = match fetch_with_retry(client, source, page, cancel).await {
                        Ok(envelope) => {
                            let records =
                                normalize_page(normalizer, source, page, total_pages, envelope, sink);
                            pause(source.request_delay, cancel).await;
                            Ok(records)
                        }
                        Err(err) => Err(err),
                    };
                    (page, result)
                })
                .buffer_unordered(source.concurrency.max(1))
                .collect()
                .await;

        for (page, result) in results {
            match result {
                Ok(records) => {
                    pages.insert(page, records);
                }
                Err(error) => {
                    pages_dropped += 1;
                    sink.emit(FetchEvent::PageDropped {
                        source: source.name.clone(),
                        page,
                        error,
                    });
                }
            }
        }
    }

    let pages_fetched = pages.len();
    let status = if pages_dropped == 0 {
        SourceStatus::Complete
    } else {
        SourceStatus::Partial
    };

    SourceOutcome {
        source: source.name.clone(),
        status,
        total_pages,
        pages_fetched,
        pages_dropped,
        records: pages.into_values().flatten().collect(),
    }
}

fn normalize_page(
    normalizer: &dyn Normalizer,
    source: &SourceConfig,
    page: PageNumber,
    total_pages: PageNumber,
    envelope: PageEnvelope,
    sink: &dyn ProgressSink,
) -> Vec<Record> {
    if envelope.skipped_items > 0 {
        engine_warn!(
            "{}: page {} had {} undecodable items",
            source.name,
            page,
            envelope.skipped_items
        );
    }
    let records: Vec<Record> = envelope
        .items
        .into_iter()
        .map(|item| normalizer.normalize(item, source))
        .collect();
    sink.emit(FetchEvent::PageFetched {
        source: source.name.clone(),
        page,
        items: records.len(),
        total_pages,
    });
    records
}

/// Fetch all sources concurrently under one global deadline.
///
/// Outcomes come back in `sources` order. When the deadline expires (or
/// `cancel` fires) scheduling stops everywhere; a source that had not
/// finished by then and is not complete contributes no records and is
/// reported as `TimedOut` (or `Cancelled`).
pub async fn fetch_all(
    client: &dyn PageClient,
    normalizer: &dyn Normalizer,
    sources: &[SourceConfig],
    deadline: Duration,
    cancel: &CancellationToken,
    sink: &dyn ProgressSink,
) -> Vec<SourceOutcome> {
    let global = cancel.child_token();
    let global_ref = &global;
    let work = join_all(sources.iter().map(|source| async move {
        let outcome = fetch_source(client, normalizer, source, global_ref, sink).await;
        let cut_short = global_ref.is_cancelled();
        (outcome, cut_short)
    }));
    tokio::pin!(work);

    let finished = tokio::select! {
        finished = &mut work => finished,
        _ = tokio::time::sleep(deadline) => {
            engine_warn!("global fetch deadline of {:?} reached, no further pages scheduled", deadline);
            global.cancel();
            work.await
        }
    };

    let interrupted_status = if cancel.is_cancelled() {
        SourceStatus::Cancelled
    } else {
        SourceStatus::TimedOut
    };

    finished
        .into_iter()
        .map(|(mut outcome, cut_short)| {
            if cut_short && outcome.status != SourceStatus::Complete {
                outcome.status = interrupted_status;
                outcome.records.clear();
            }
            sink.emit(FetchEvent::SourceFinished {
                source: outcome.source.clone(),
                status: outcome.status,
                records: outcome.records.len(),
            });
            outcome
        })
        .collect()
}

/// Sleep for `delay` unless `cancel` fires first. Returns false when cancelled.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
