//! Log cache — two tiers: sharded local files plus the `log_metadata`
//! table. Either tier can rehydrate the other, so a wiped database or a
//! cleaned cache directory heals on the next scan.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::{ScanError, ScanResult};
use crate::models::log_metadata::{LogMetadata, NewLogMetadata};
use crate::schema::log_metadata;
use crate::services::ci_provider::{failing_step, HttpCiProvider, LogChunk};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Shard directory for a build: the decimal build number with its last
/// four digits dropped, bounding each directory to 10 000 log files.
pub fn shard(build_num: i64) -> String {
    (build_num / 10_000).to_string()
}

/// Canonical log text: the concatenation of `message` over payload
/// elements with `type == "out"`, joined without separators.
pub fn canonical_log_text(chunks: &[LogChunk]) -> String {
    chunks
        .iter()
        .filter(|c| c.chunk_type == "out")
        .map(|c| c.message.as_str())
        .collect()
}

/// Count of newline-terminated lines.
pub fn line_count(text: &str) -> i32 {
    text.bytes().filter(|b| *b == b'\n').count() as i32
}

/// Character count of the raw text (the `byte_count` column is measured
/// in characters, not UTF-8 bytes).
pub fn byte_count(text: &str) -> i32 {
    text.chars().count() as i32
}

/// Insert the `log_metadata` row for a step, if absent. The table holds
/// at most one row per step; an existing row is left untouched.
pub async fn record_metadata(
    conn: &mut AsyncPgConnection,
    step_id: i64,
    text: &str,
) -> ScanResult<()> {
    let row = NewLogMetadata {
        step: step_id,
        line_count: line_count(text),
        byte_count: byte_count(text),
        content: text.to_string(),
    };
    diesel::insert_into(log_metadata::table)
        .values(&row)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}

/// Local file tier rooted at a configurable directory; this cache
/// exclusively owns the directory tree below `root`.
#[derive(Debug, Clone)]
pub struct LogCache {
    root: PathBuf,
}

impl LogCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn log_path(&self, build_num: i64) -> PathBuf {
        self.root
            .join(shard(build_num))
            .join(format!("{build_num}.log"))
    }

    /// Read the cached log file, if present.
    pub async fn read_cached(&self, build_num: i64) -> ScanResult<Option<String>> {
        match tokio::fs::read_to_string(self.log_path(build_num)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ScanError::Cache(e)),
        }
    }

    /// Write the log file via temp-file + rename. The text is not visible
    /// to readers until the rename completes; when two workers race on the
    /// same build the loser's rename simply replaces identical content.
    pub async fn write_atomic(&self, build_num: i64, text: &str) -> ScanResult<()> {
        let path = self.log_path(build_num);
        let dir = path.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir).await?;

        let tmp = dir.join(format!(
            "{build_num}.log.{}.{}.tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, text).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ScanError::Cache(e));
        }
        Ok(())
    }

    async fn download(
        &self,
        provider: &HttpCiProvider,
        build_num: i64,
        output_url: &str,
    ) -> ScanResult<String> {
        let started = Instant::now();
        let chunks = provider.fetch_log(output_url).await?;
        let text = canonical_log_text(&chunks);
        self.write_atomic(build_num, &text).await?;

        crate::metrics::log_fetched("network");
        crate::metrics::log_download_duration(started.elapsed().as_millis() as u64);
        tracing::debug!(
            build_num,
            bytes = text.len(),
            lines = line_count(&text),
            "Log downloaded"
        );
        Ok(text)
    }

    /// Acquire a log during first visitation, before any `build_steps` row
    /// exists. Only the file tier is consulted; the metadata row is
    /// recorded by the caller once the step row is in place, so a failed
    /// download leaves nothing behind.
    pub async fn fetch_for_visit(
        &self,
        provider: &HttpCiProvider,
        build_num: i64,
        output_url: &str,
    ) -> ScanResult<String> {
        if let Some(text) = self.read_cached(build_num).await? {
            crate::metrics::log_fetched("file");
            return Ok(text);
        }
        self.download(provider, build_num, output_url).await
    }

    /// Acquire a log for an already-visited step, consulting the file
    /// tier, then `log_metadata`, then the network. Whichever tier misses
    /// is repopulated from the one that hits. With no URL on hand the
    /// build's metadata is re-fetched to derive one; a timeout or
    /// URL-less step yields `NoLogAvailable`.
    pub async fn get_or_fetch(
        &self,
        conn: &mut AsyncPgConnection,
        provider: &HttpCiProvider,
        build_num: i64,
        step_id: i64,
        output_url: Option<&str>,
    ) -> ScanResult<String> {
        if let Some(text) = self.read_cached(build_num).await? {
            record_metadata(conn, step_id, &text).await?;
            crate::metrics::log_fetched("file");
            return Ok(text);
        }

        let db_row: Option<LogMetadata> = log_metadata::table
            .find(step_id)
            .first(conn)
            .await
            .optional()?;
        if let Some(row) = db_row {
            self.write_atomic(build_num, &row.content).await?;
            crate::metrics::log_fetched("database");
            return Ok(row.content);
        }

        let url = match output_url {
            Some(u) => u.to_string(),
            None => {
                let info = provider.fetch_build(build_num).await?;
                failing_step(&info)
                    .filter(|s| !s.is_timeout)
                    .and_then(|s| s.output_url)
                    .ok_or(ScanError::NoLogAvailable { build_num })?
            }
        };

        let text = self.download(provider, build_num, &url).await?;
        record_metadata(conn, step_id, &text).await?;
        Ok(text)
    }
}
