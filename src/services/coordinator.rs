//! Scan coordinator — drains the revisit and visit queues for one batch.
//!
//! Control flow is concurrent over builds (bounded worker pool) and
//! sequential within a build: metadata fetch, then log acquisition, then
//! matching, then persistence. Per-build failures are recovered at the
//! build boundary; only database connectivity aborts the batch.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::db::DbPool;
use crate::error::{ScanError, ScanResult};
use crate::services::ci_provider::{failing_step, HttpCiProvider};
use crate::services::log_cache::{self, LogCache};
use crate::services::matcher;
use crate::services::pattern_store::{PatternCatalog, ScanPattern};
use crate::services::planner::{self, RevisitCandidate, ScanPolicy};
use crate::services::scan_service;

/// Totals for one completed batch.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    /// Absent when the catalog was empty and no scan row was opened.
    pub scan_id: Option<i64>,
    pub revisited: usize,
    pub visited: usize,
    pub skipped: usize,
    pub matches_recorded: usize,
}

#[derive(Debug)]
enum BuildOutcome {
    Scanned { matches: usize },
    Revisited { matches: usize },
    Timeout,
    Idiopathic,
    NoLog,
}

#[derive(Clone)]
struct WorkerCtx {
    pool: DbPool,
    provider: Arc<HttpCiProvider>,
    cache: Arc<LogCache>,
    catalog: Arc<PatternCatalog>,
    scan_id: Option<i64>,
}

pub struct Coordinator {
    pool: DbPool,
    provider: Arc<HttpCiProvider>,
    cache: Arc<LogCache>,
    worker_count: usize,
}

impl Coordinator {
    pub fn new(
        pool: DbPool,
        provider: HttpCiProvider,
        cache: LogCache,
        worker_count: usize,
    ) -> Self {
        Self {
            pool,
            provider: Arc::new(provider),
            cache: Arc::new(cache),
            worker_count: worker_count.max(1),
        }
    }

    /// Run one scan batch: open a scan row, revisit builds owing new
    /// patterns, then visit builds never inspected. The shutdown signal
    /// is honoured between builds; in-flight builds finish their current
    /// step before the batch returns.
    pub async fn run(
        &self,
        catalog: Arc<PatternCatalog>,
        policy: &ScanPolicy,
        shutdown: &watch::Receiver<bool>,
    ) -> ScanResult<ScanSummary> {
        let mut conn = get_conn(&self.pool).await?;

        let latest = catalog.latest_pattern_id();
        let scan_id = if latest >= 0 {
            Some(scan_service::open_scan(&mut conn, latest).await?)
        } else {
            tracing::warn!("Pattern catalog is empty; visiting builds without scanning");
            None
        };

        let revisits = planner::revisitable_builds(&mut conn, &catalog, policy).await?;
        let unvisited = planner::unvisited_builds(&mut conn, policy).await?;
        drop(conn);

        tracing::info!(
            scan_id,
            revisitable = revisits.len(),
            unvisited = unvisited.len(),
            workers = self.worker_count,
            "Scan batch planned"
        );

        let ctx = WorkerCtx {
            pool: self.pool.clone(),
            provider: self.provider.clone(),
            cache: self.cache.clone(),
            catalog,
            scan_id,
        };
        let mut summary = ScanSummary {
            scan_id,
            ..Default::default()
        };

        drain_queue(
            self.worker_count,
            revisits,
            &ctx,
            shutdown,
            &mut summary,
            revisit_build,
        )
        .await?;
        drain_queue(
            self.worker_count,
            unvisited,
            &ctx,
            shutdown,
            &mut summary,
            visit_build,
        )
        .await?;

        tracing::info!(
            scan_id,
            visited = summary.visited,
            revisited = summary.revisited,
            skipped = summary.skipped,
            matches = summary.matches_recorded,
            "Scan batch finished"
        );
        Ok(summary)
    }
}

/// Feed work items through a bounded pool of spawned tasks, preserving
/// queue order at submission. Transient per-build errors are tallied and
/// the queue continues; a batch-aborting error lets in-flight builds
/// finish, then surfaces.
async fn drain_queue<T, F, Fut>(
    workers: usize,
    items: Vec<T>,
    ctx: &WorkerCtx,
    shutdown: &watch::Receiver<bool>,
    summary: &mut ScanSummary,
    run_item: F,
) -> ScanResult<()>
where
    T: Send + 'static,
    F: Fn(WorkerCtx, T) -> Fut,
    Fut: Future<Output = (i64, Result<BuildOutcome, ScanError>)> + Send + 'static,
{
    let mut join: JoinSet<(i64, Result<BuildOutcome, ScanError>)> = JoinSet::new();
    let mut abort: Option<ScanError> = None;

    for item in items {
        if *shutdown.borrow() {
            tracing::info!("Shutdown requested; stopping before next build");
            break;
        }
        while join.len() >= workers {
            if let Some(res) = join.join_next().await {
                tally(res, summary, &mut abort);
            }
        }
        if abort.is_some() {
            break;
        }
        join.spawn(run_item(ctx.clone(), item));
    }

    while let Some(res) = join.join_next().await {
        tally(res, summary, &mut abort);
    }

    match abort {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn tally(
    res: Result<(i64, Result<BuildOutcome, ScanError>), tokio::task::JoinError>,
    summary: &mut ScanSummary,
    abort: &mut Option<ScanError>,
) {
    match res {
        Ok((_, Ok(outcome))) => match outcome {
            BuildOutcome::Scanned { matches } => {
                summary.visited += 1;
                summary.matches_recorded += matches;
                crate::metrics::build_visited("scanned");
            }
            BuildOutcome::Revisited { matches } => {
                summary.revisited += 1;
                summary.matches_recorded += matches;
                crate::metrics::build_revisited();
            }
            BuildOutcome::Timeout => {
                summary.visited += 1;
                crate::metrics::build_visited("timeout");
            }
            BuildOutcome::Idiopathic => {
                summary.visited += 1;
                crate::metrics::build_visited("idiopathic");
            }
            BuildOutcome::NoLog => {
                summary.visited += 1;
                crate::metrics::build_visited("no_log");
            }
        },
        Ok((build_num, Err(e))) => {
            crate::metrics::scan_error(e.kind());
            if e.aborts_batch() {
                tracing::error!(build_num, error = %e, "Database failure; aborting batch");
                if abort.is_none() {
                    *abort = Some(e);
                }
            } else {
                tracing::warn!(build_num, error = %e, "Build skipped, will retry next batch");
                crate::metrics::build_skipped(e.kind());
                summary.skipped += 1;
            }
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "Scan worker task failed");
            summary.skipped += 1;
        }
    }
}

async fn get_conn(
    pool: &DbPool,
) -> Result<diesel_async::pooled_connection::deadpool::Object<diesel_async::AsyncPgConnection>, ScanError>
{
    pool.get().await.map_err(|e| ScanError::Pool(e.to_string()))
}

// ── Visit loop ──

async fn visit_build(ctx: WorkerCtx, build_num: i64) -> (i64, Result<BuildOutcome, ScanError>) {
    (build_num, visit_build_inner(&ctx, build_num).await)
}

async fn visit_build_inner(
    ctx: &WorkerCtx,
    build_num: i64,
) -> Result<BuildOutcome, ScanError> {
    let info = ctx.provider.fetch_build(build_num).await?;

    let Some(step) = failing_step(&info) else {
        let mut conn = get_conn(&ctx.pool).await?;
        scan_service::ensure_build_step(&mut conn, build_num, None, false).await?;
        tracing::info!(build_num, "No attributable failing step");
        return Ok(BuildOutcome::Idiopathic);
    };

    if step.is_timeout {
        let mut conn = get_conn(&ctx.pool).await?;
        scan_service::ensure_build_step(&mut conn, build_num, Some(&step.step_name), true).await?;
        tracing::info!(build_num, step = %step.step_name, "Failing step timed out; nothing to scan");
        return Ok(BuildOutcome::Timeout);
    }

    let Some(output_url) = step.output_url.as_deref() else {
        let mut conn = get_conn(&ctx.pool).await?;
        scan_service::ensure_build_step(&mut conn, build_num, Some(&step.step_name), false).await?;
        tracing::info!(build_num, step = %step.step_name, "Failing step has no output URL");
        return Ok(BuildOutcome::NoLog);
    };

    // Acquire the log before writing any row, so a failed download leaves
    // the build unvisited and it is retried wholesale next batch.
    let text = ctx
        .cache
        .fetch_for_visit(&ctx.provider, build_num, output_url)
        .await?;

    let mut conn = get_conn(&ctx.pool).await?;
    let step_id =
        scan_service::ensure_build_step(&mut conn, build_num, Some(&step.step_name), false).await?;
    log_cache::record_metadata(&mut conn, step_id, &text).await?;

    let applicable: Vec<&ScanPattern> = ctx
        .catalog
        .all()
        .filter(|p| p.applies_to_step(&step.step_name))
        .collect();
    let found = matcher::scan_log(&text, &applicable);

    let matches = match ctx.scan_id {
        Some(scan_id) => {
            let recorded = scan_service::record_matches(&mut conn, scan_id, step_id, &found).await?;
            scan_service::advance_watermark(
                &mut conn,
                scan_id,
                build_num,
                ctx.catalog.latest_pattern_id(),
            )
            .await?;
            recorded
        }
        None => 0,
    };

    tracing::info!(build_num, step = %step.step_name, matches, "Build scanned");
    Ok(BuildOutcome::Scanned { matches })
}

// ── Revisit loop ──

async fn revisit_build(
    ctx: WorkerCtx,
    candidate: RevisitCandidate,
) -> (i64, Result<BuildOutcome, ScanError>) {
    let build_num = candidate.build_num;
    (build_num, revisit_build_inner(&ctx, candidate).await)
}

async fn revisit_build_inner(
    ctx: &WorkerCtx,
    candidate: RevisitCandidate,
) -> Result<BuildOutcome, ScanError> {
    let Some(scan_id) = ctx.scan_id else {
        return Ok(BuildOutcome::Revisited { matches: 0 });
    };

    let subset = ctx.catalog.subset(&candidate.pending);
    let applicable: Vec<&ScanPattern> = subset
        .into_iter()
        .filter(|p| p.applies_to_step(&candidate.step_name))
        .collect();

    let mut conn = get_conn(&ctx.pool).await?;

    // The watermark covers the full pending id range whether or not the
    // patterns apply to this step; the log is only worth fetching when
    // something in the range applies.
    let found = if applicable.is_empty() {
        Vec::new()
    } else {
        let text = ctx
            .cache
            .get_or_fetch(
                &mut conn,
                &ctx.provider,
                candidate.build_num,
                candidate.build_step_id,
                None,
            )
            .await?;
        matcher::scan_log(&text, &applicable)
    };

    let matches =
        scan_service::record_matches(&mut conn, scan_id, candidate.build_step_id, &found).await?;

    let newest = candidate
        .pending
        .iter()
        .copied()
        .max()
        .unwrap_or(ctx.catalog.latest_pattern_id());
    scan_service::advance_watermark(&mut conn, scan_id, candidate.build_num, newest).await?;

    tracing::info!(
        build_num = candidate.build_num,
        step = %candidate.step_name,
        pending = candidate.pending.len(),
        matches,
        "Build revisited"
    );
    Ok(BuildOutcome::Revisited { matches })
}
