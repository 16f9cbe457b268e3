//! Reconciles attachment metadata against the uploads directory and object
//! storage.
//!
//! Every file an attachment references (the primary file and each size
//! variant) is checked in both places. Files confirmed present in both are
//! deletion candidates: their local copies can go. Nothing is deleted during
//! the scan itself; see [`cleanup()`].

use crate::error::{ErrorKind, Result};
use crate::remote::{Probe, RemoteStore};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use offload_asyncutils::WorkerPool;
use offload_codec::{Metadata, RemoteDescriptor};
use offload_db::{AttachmentRow, Repository};
use offload_storage::BackendHandle;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::instrument;

/// Label of the check for an attachment's primary file.
pub const MAIN_LABEL: &str = "main";

/// One file to look for, locally and remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    pub attachment_id: i64,
    /// [`MAIN_LABEL`] or the name of the size variant.
    pub label: String,
    /// Path relative to the uploads directory.
    pub local_path: String,
    pub remote_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Present in both places; the local copy may be deleted.
    Candidate,
    MissingRemotely,
    MissingLocally,
    MissingBoth,
    /// At least one of the checks couldn't tell.
    ProbeFailed,
}
impl Verdict {
    pub fn classify(local: Probe, remote: Probe) -> Self {
        match (local, remote) {
            (Probe::Unknown, _) | (_, Probe::Unknown) => Self::ProbeFailed,
            (Probe::Present, Probe::Present) => Self::Candidate,
            (Probe::Present, Probe::Absent) => Self::MissingRemotely,
            (Probe::Absent, Probe::Present) => Self::MissingLocally,
            (Probe::Absent, Probe::Absent) => Self::MissingBoth,
        }
    }
}

/// Why (part of) an attachment was left out of the audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Malformed {
    /// The whole metadata value is unreadable.
    Metadata,
    /// A single entry of the `sizes` map is unreadable.
    Size(String),
}

/// Progress events emitted by [`audit`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) - exactly once.
/// 2. [`Scanned`](Self::Scanned), [`Malformed`](Self::Malformed) and
///    [`Checked`](Self::Checked) - interleaved, as checks complete.
/// 3. [`Complete`](Self::Complete) - exactly once, after every check has
///    finished.
///
/// A broken attachment cursor terminates the stream early, in which case
/// [`Complete`](Self::Complete) is never emitted.
#[derive(Debug)]
pub enum AuditEvent {
    Started,
    /// An attachment was read and queued for `checks` file checks.
    Scanned { attachment_id: i64, checks: usize },
    Malformed { attachment_id: i64, malformed: Malformed },
    Checked { check: FileCheck, verdict: Verdict },
    Complete(AuditReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditCounts {
    pub attachments: u64,
    pub checks: u64,
    pub missing_remotely: u64,
    pub missing_locally: u64,
    pub missing_both: u64,
    pub probe_failed: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub counts: AuditCounts,
    /// Local paths (relative to the uploads directory) safe to delete.
    pub candidates: BTreeSet<String>,
    // Paths some other check could not confirm remotely.
    held: BTreeSet<String>,
}
impl AuditReport {
    fn record(&mut self, event: &AuditEvent) {
        match event {
            AuditEvent::Scanned { .. } => self.counts.attachments += 1,
            AuditEvent::Malformed { .. } => self.counts.malformed += 1,
            AuditEvent::Checked { check, verdict } => {
                self.counts.checks += 1;
                match verdict {
                    Verdict::Candidate => _ = self.candidates.insert(check.local_path.clone()),
                    Verdict::MissingRemotely => self.counts.missing_remotely += 1,
                    Verdict::MissingLocally => self.counts.missing_locally += 1,
                    Verdict::MissingBoth => self.counts.missing_both += 1,
                    Verdict::ProbeFailed => self.counts.probe_failed += 1,
                }
                if *verdict != Verdict::Candidate {
                    self.held.insert(check.local_path.clone());
                }
            },
            AuditEvent::Started | AuditEvent::Complete(_) => {},
        }
    }

    fn finish(mut self) -> Self {
        // The same file may be referenced twice (under different keys).
        let held = std::mem::take(&mut self.held);
        self.candidates.retain(|path| !held.contains(path));
        self
    }
}

/// The checks for every file `metadata` references.
///
/// Remote keys come from the stored descriptors where there are valid ones,
/// and are derived from the local path otherwise.
pub fn file_checks(attachment_id: i64, metadata: &Metadata, remote: &RemoteStore) -> Vec<FileCheck> {
    let mut checks = vec![FileCheck {
        attachment_id,
        label: MAIN_LABEL.to_string(),
        remote_key: remote_key(metadata.remote.as_ref(), &metadata.primary_file, remote),
        local_path: metadata.primary_file.clone(),
    }];
    for (name, variant) in metadata.sizes.variants() {
        let local_path = metadata.variant_path(&variant.file_name);
        checks.push(FileCheck {
            attachment_id,
            label: name.to_string(),
            remote_key: remote_key(variant.remote.as_ref(), &local_path, remote),
            local_path,
        });
    }
    checks
}

fn remote_key(descriptor: Option<&RemoteDescriptor>, local_path: &str, remote: &RemoteStore) -> String {
    match descriptor {
        Some(descriptor) if descriptor.is_valid() => descriptor.key.clone(),
        _ => remote.key_for(local_path),
    }
}

enum Unit {
    Scanned { attachment_id: i64, checks: usize },
    Malformed { attachment_id: i64, malformed: Malformed },
    Check(FileCheck),
    Failed(offload_db::error::Error),
}

/// Streams [`AuditEvent`]s for every attachment in `repo`.
///
/// File checks run on `pool`, with at most [`WorkerPool::workers()`] of them
/// in flight. Malformed metadata is reported and skipped; only a broken
/// attachment cursor is fatal, and checks already under way still report
/// before it does.
pub fn audit<'a>(
    repo: &'a Repository,
    local: &'a BackendHandle,
    remote: &'a RemoteStore,
    pool: WorkerPool,
) -> impl Stream<Item = Result<AuditEvent>> + 'a {
    audit_rows(repo.stream_attachments(0), local, remote, pool)
}

fn audit_rows<'a, S>(
    rows: S,
    local: &'a BackendHandle,
    remote: &'a RemoteStore,
    pool: WorkerPool,
) -> impl Stream<Item = Result<AuditEvent>> + 'a
where
    S: Stream<Item = offload_db::error::Result<AttachmentRow>> + Send + 'a,
{
    stream!({
        yield Ok(AuditEvent::Started);
        tracing::info!(workers = pool.workers(), local = local.name(), bucket = remote.bucket(), "Audit started");

        let mut report = AuditReport::default();
        let mut cursor_error = None;
        let events = pool.process(units(rows, remote), move |unit| evaluate(local, remote, unit));
        for await event in events {
            match event {
                Ok(event) => {
                    report.record(&event);
                    yield Ok(event);
                },
                // The unit stream ends here; drain whatever is still in flight.
                Err(e) => cursor_error = Some(e),
            }
        }
        if let Some(e) = cursor_error {
            tracing::error!(attachments = report.counts.attachments, "Attachment cursor failed");
            yield Err(e);
            return;
        }

        let report = report.finish();
        tracing::info!(
            attachments = report.counts.attachments,
            checks = report.counts.checks,
            candidates = report.candidates.len(),
            missing_remotely = report.counts.missing_remotely,
            missing_locally = report.counts.missing_locally,
            missing_both = report.counts.missing_both,
            probe_failed = report.counts.probe_failed,
            malformed = report.counts.malformed,
            "Audit complete"
        );
        yield Ok(AuditEvent::Complete(report));
    })
}

fn units<'a, S>(rows: S, remote: &'a RemoteStore) -> impl Stream<Item = Unit> + Send + 'a
where
    S: Stream<Item = offload_db::error::Result<AttachmentRow>> + Send + 'a,
{
    stream!({
        for await row in rows {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    yield Unit::Failed(e);
                    return;
                },
            };
            let metadata = match offload_codec::decode(&row.meta_value) {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(id = row.id, error = ?e, "Skipping attachment with unreadable metadata");
                    yield Unit::Malformed { attachment_id: row.id, malformed: Malformed::Metadata };
                    continue;
                },
            };
            let malformed: Vec<String> = metadata.sizes.malformed().map(ToString::to_string).collect();
            for name in malformed {
                tracing::warn!(id = row.id, size = %name, "Skipping malformed size entry");
                yield Unit::Malformed { attachment_id: row.id, malformed: Malformed::Size(name) };
            }
            let checks = file_checks(row.id, &metadata, remote);
            yield Unit::Scanned { attachment_id: row.id, checks: checks.len() };
            for check in checks {
                yield Unit::Check(check);
            }
        }
    })
}

async fn evaluate(local: &BackendHandle, remote: &RemoteStore, unit: Unit) -> Result<AuditEvent> {
    let check = match unit {
        Unit::Scanned { attachment_id, checks } => return Ok(AuditEvent::Scanned { attachment_id, checks }),
        Unit::Malformed { attachment_id, malformed } => return Ok(AuditEvent::Malformed { attachment_id, malformed }),
        Unit::Failed(e) => return Err(e).or_raise(|| ErrorKind::Cursor),
        Unit::Check(check) => check,
    };
    let (on_disk, in_bucket) = tokio::join!(probe_local(local, &check.local_path), remote.probe(&check.remote_key));
    let verdict = Verdict::classify(on_disk, in_bucket);
    let (id, label, path, key) = (check.attachment_id, check.label.as_str(), check.local_path.as_str(), check.remote_key.as_str());
    match verdict {
        Verdict::Candidate => tracing::debug!(id, label, path, "Present locally and remotely"),
        Verdict::MissingRemotely => tracing::warn!(id, label, path, key, "Missing from object storage"),
        Verdict::MissingLocally => tracing::warn!(id, label, path, key, "Missing from the uploads directory"),
        Verdict::MissingBoth => tracing::warn!(id, label, path, key, "Missing locally and remotely"),
        Verdict::ProbeFailed => tracing::warn!(id, label, path, key, "Could not check file; leaving it alone"),
    }
    Ok(AuditEvent::Checked { check, verdict })
}

async fn probe_local(local: &BackendHandle, path: &str) -> Probe {
    match local.exists(Path::new(path)).await {
        Ok(true) => Probe::Present,
        Ok(false) => Probe::Absent,
        Err(e) => {
            tracing::warn!(path, error = ?e, "Local existence check failed");
            Probe::Unknown
        },
    }
}

/// Drive [`audit`] to the end, returning its report.
pub async fn audit_to_completion(
    repo: &Repository,
    local: &BackendHandle,
    remote: &RemoteStore,
    pool: WorkerPool,
) -> Result<AuditReport> {
    let mut events = std::pin::pin!(audit(repo, local, remote, pool));
    while let Some(event) = events.next().await {
        if let AuditEvent::Complete(report) = event? {
            return Ok(report);
        }
    }
    exn::bail!(ErrorKind::Cursor)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    /// Path and reason of every deletion that failed.
    pub failed: Vec<(String, String)>,
}

/// Delete the local copy of every candidate.
///
/// Failures don't stop the clean-up; each one is reported individually.
#[instrument(skip_all, fields(backend = local.name(), candidates = candidates.len()))]
pub async fn cleanup(local: &BackendHandle, candidates: &BTreeSet<String>) -> CleanupReport {
    let mut report = CleanupReport::default();
    for path in candidates {
        match local.delete(Path::new(path)).await {
            Ok(()) => {
                tracing::info!(path, "Deleted local copy");
                report.deleted.push(path.clone());
            },
            Err(e) => {
                tracing::warn!(path, error = ?e, "Could not delete local copy");
                report.failed.push((path.clone(), e.to_string()));
            },
        }
    }
    tracing::info!(deleted = report.deleted.len(), failed = report.failed.len(), "Clean-up complete");
    report
}
