//! Finished outputs waiting to be downloaded.
//!
//! Each successful job registers its output here under its job id. A download
//! claims the entry exactly once; unclaimed entries expire after a TTL and a
//! background sweeper deletes their files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sc_av::ScratchSpace;
use sc_core::media::{job_id_from_output_name, output_file_name};
use sc_core::JobId;
use tokio_util::sync::CancellationToken;

/// An output video that has not been downloaded yet.
#[derive(Debug, Clone)]
pub struct ReadyOutput {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe map from job id to its ready output.
pub struct DownloadRegistry {
    entries: DashMap<JobId, ReadyOutput>,
    scratch: Arc<ScratchSpace>,
    ttl: Duration,
}

impl DownloadRegistry {
    pub fn new(scratch: Arc<ScratchSpace>, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            scratch,
            ttl,
        }
    }

    /// Record `path` as the output of `job_id` and return the public file
    /// name to download it by.
    pub fn register(&self, job_id: JobId, path: PathBuf) -> String {
        let filename = output_file_name(job_id);
        tracing::info!(job_id = %job_id, "Output ready for download: {filename}");
        self.entries.insert(
            job_id,
            ReadyOutput {
                path,
                created_at: Utc::now(),
            },
        );
        filename
    }

    /// Remove and return the entry for `filename`.
    ///
    /// Returns `None` for names this registry never issued, for expired
    /// entries and for entries that were already claimed.
    pub fn claim(&self, filename: &str) -> Option<ReadyOutput> {
        let job_id = job_id_from_output_name(filename)?;
        let (_, entry) = self.entries.remove(&job_id)?;
        if self.is_expired(&entry, Utc::now()) {
            tracing::debug!(job_id = %job_id, "Claimed output had expired");
            self.scratch.release(&entry.path);
            return None;
        }
        Some(entry)
    }

    /// Look up the entry for `filename` without claiming it.
    pub fn peek(&self, filename: &str) -> Option<ReadyOutput> {
        let job_id = job_id_from_output_name(filename)?;
        let entry = self.entries.get(&job_id)?;
        if self.is_expired(entry.value(), Utc::now()) {
            return None;
        }
        Some(entry.value().clone())
    }

    /// Drop entries older than the TTL and delete their files.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut expired = Vec::new();
        self.entries.retain(|job_id, entry| {
            if self.is_expired(entry, now) {
                expired.push((*job_id, entry.path.clone()));
                false
            } else {
                true
            }
        });

        for (job_id, path) in &expired {
            tracing::info!(job_id = %job_id, "Expired undownloaded output removed");
            self.scratch.release(path);
        }

        expired.len()
    }

    /// Delete every unclaimed output. Used at shutdown.
    pub fn release_all(&self) -> usize {
        let ids: Vec<JobId> = self.entries.iter().map(|e| *e.key()).collect();
        let mut released = 0;
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                self.scratch.release(&entry.path);
                released += 1;
            }
        }
        if released > 0 {
            tracing::info!(released, "Released unclaimed outputs");
        }
        released
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &ReadyOutput, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        now - entry.created_at >= ttl
    }

    #[cfg(test)]
    fn backdate(&self, job_id: JobId, by: Duration) {
        if let Some(mut entry) = self.entries.get_mut(&job_id) {
            entry.created_at -= chrono::Duration::from_std(by).unwrap();
        }
    }
}

/// Start a background task that periodically sweeps expired outputs until
/// `cancel` fires.
pub fn start_sweeper(
    registry: Arc<DownloadRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = registry.sweep_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Download sweep");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}
