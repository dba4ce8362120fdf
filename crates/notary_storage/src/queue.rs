//! `JobQueue` on redb.
//!
//! The dedupe index holds the key of every non-terminal job. Insert checks
//! it and writes the job in the same transaction; finishing a job removes
//! its key. The claimable index orders non-terminal jobs by the time they
//! become claimable, so a claim reads one entry instead of every row.

use crate::error::{db_err, StorageError, StorageResult};
use crate::schema::{next_seq, JobRow, ACTIVE_DEDUPE, CLAIMABLE, JOBS, JOB_RUNS};
use crate::store::RedbStore;
use async_trait::async_trait;
use notary_core::{EntityId, JobId, Timestamp, WorkerId};
use notary_queue::job::close_open_run;
use notary_queue::{
    DedupeKey, Job, JobQueue, JobRun, JobStatus, NewJob, QueueError, QueueResult, RunOutcome,
};
use redb::{ReadableTable, Table, WriteTransaction};
use std::time::Duration;
use tracing::{debug, warn};

type BytesTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

fn load_row(table: &BytesTable<'_>, key: &str) -> StorageResult<Option<JobRow>> {
    match table.get(key).map_err(db_err)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn get_row(table: &BytesTable<'_>, job_id: JobId) -> QueueResult<JobRow> {
    load_row(table, &job_id.to_string())?.ok_or(QueueError::NotFound { job_id })
}

/// Move a job's claimable index entry from `before` to `after`
fn reindex(
    txn: &WriteTransaction,
    row: &JobRow,
    before: Option<Timestamp>,
    after: Option<Timestamp>,
) -> StorageResult<()> {
    if before == after {
        return Ok(());
    }
    let mut claimable = txn.open_table(CLAIMABLE).map_err(db_err)?;
    if let Some(at) = before {
        claimable.remove((at.as_millis(), row.seq)).map_err(db_err)?;
    }
    if let Some(at) = after {
        let id = row.job.id.to_string();
        claimable
            .insert((at.as_millis(), row.seq), id.as_str())
            .map_err(db_err)?;
    }
    Ok(())
}

fn put_row(table: &mut BytesTable<'_>, row: &JobRow) -> StorageResult<()> {
    let key = row.job.id.to_string();
    let bytes = serde_json::to_vec(row)?;
    table.insert(key.as_str(), bytes.as_slice()).map_err(db_err)?;
    Ok(())
}

fn scan_rows<T>(table: &T) -> StorageResult<Vec<JobRow>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut rows = Vec::new();
    for item in table.iter().map_err(db_err)? {
        let (_, value) = item.map_err(db_err)?;
        rows.push(serde_json::from_slice::<JobRow>(value.value())?);
    }
    rows.sort_unstable_by_key(|r| r.seq);
    Ok(rows)
}

fn load_runs(table: &BytesTable<'_>, job_id: JobId) -> StorageResult<Vec<JobRun>> {
    let key = job_id.to_string();
    match table.get(key.as_str()).map_err(db_err)? {
        Some(guard) => Ok(serde_json::from_slice(guard.value())?),
        None => Ok(Vec::new()),
    }
}

fn store_runs(table: &mut BytesTable<'_>, job_id: JobId, runs: &[JobRun]) -> StorageResult<()> {
    let key = job_id.to_string();
    let bytes = serde_json::to_vec(runs)?;
    table.insert(key.as_str(), bytes.as_slice()).map_err(db_err)?;
    Ok(())
}

/// Lease `row` to `worker` and record the run, inside `txn`
fn lease_row(
    txn: &WriteTransaction,
    jobs: &mut BytesTable<'_>,
    mut row: JobRow,
    worker: &WorkerId,
    now: Timestamp,
    lease: Duration,
) -> QueueResult<Job> {
    let before = row.job.available_at();
    let previous = row.job.take_lease(worker, now, lease);
    put_row(jobs, &row)?;
    reindex(txn, &row, before, row.job.available_at())?;

    let mut runs_table = txn.open_table(JOB_RUNS).map_err(db_err)?;
    let mut runs = load_runs(&runs_table, row.job.id)?;
    if let Some(prev) = previous {
        warn!(job_id = %row.job.id, previous = %prev, worker_id = %worker, "reclaimed expired lease");
        close_open_run(&mut runs, &prev, RunOutcome::Reclaimed, now);
    }
    runs.push(JobRun::start(&row.job, worker, now));
    store_runs(&mut runs_table, row.job.id, &runs)?;
    Ok(row.job)
}

/// Apply a terminal transition, release the dedupe key and close the run
fn finish_row(
    txn: &WriteTransaction,
    job_id: JobId,
    worker: &WorkerId,
    status: JobStatus,
    error: Option<String>,
    now: Timestamp,
) -> QueueResult<Job> {
    let mut jobs = txn.open_table(JOBS).map_err(db_err)?;
    let mut row = get_row(&jobs, job_id)?;
    let outcome = match &error {
        Some(e) => RunOutcome::Failed { error: e.clone() },
        None => RunOutcome::Succeeded,
    };
    let before = row.job.available_at();
    row.job.finish(worker, status, error, now)?;
    put_row(&mut jobs, &row)?;
    reindex(txn, &row, before, None)?;

    let mut active = txn.open_table(ACTIVE_DEDUPE).map_err(db_err)?;
    let key = row.job.dedupe_key.as_str();
    let holds_key = active
        .get(key)
        .map_err(db_err)?
        .is_some_and(|g| g.value() == job_id.to_string());
    if holds_key {
        active.remove(key).map_err(db_err)?;
    }

    let mut runs_table = txn.open_table(JOB_RUNS).map_err(db_err)?;
    let mut runs = load_runs(&runs_table, job_id)?;
    close_open_run(&mut runs, worker, outcome, now);
    store_runs(&mut runs_table, job_id, &runs)?;
    Ok(row.job)
}

#[async_trait]
impl JobQueue for RedbStore {
    async fn insert(&self, new: NewJob, now: Timestamp) -> QueueResult<Job> {
        self.write_txn(move |txn| {
            let key = new.dedupe_key();
            let mut active = txn.open_table(ACTIVE_DEDUPE).map_err(db_err)?;
            if active.get(key.as_str()).map_err(db_err)?.is_some() {
                return Err(QueueError::DuplicateJobInsert { dedupe_key: key });
            }

            let seq = next_seq(txn, "jobs")?;
            let job = new.into_job(now);
            let id = job.id.to_string();
            active.insert(key.as_str(), id.as_str()).map_err(db_err)?;

            let row = JobRow { seq, job: job.clone() };
            let mut jobs = txn.open_table(JOBS).map_err(db_err)?;
            put_row(&mut jobs, &row)?;
            reindex(txn, &row, None, row.job.available_at())?;
            debug!(job_id = %job.id, dedupe_key = %job.dedupe_key, "job inserted");
            Ok(job)
        })
        .await
    }

    async fn claim_next(
        &self,
        worker: &WorkerId,
        now: Timestamp,
        lease: Duration,
    ) -> QueueResult<Option<Job>> {
        let worker = worker.clone();
        self.write_txn(move |txn| {
            let next = {
                let claimable = txn.open_table(CLAIMABLE).map_err(db_err)?;
                let mut due = claimable
                    .range(..=(now.as_millis(), u64::MAX))
                    .map_err(db_err)?;
                due.next()
                    .map(|item| item.map(|(_, id)| id.value().to_string()))
                    .transpose()
                    .map_err(db_err)?
            };
            let Some(key) = next else {
                return Ok(None);
            };
            let mut jobs = txn.open_table(JOBS).map_err(db_err)?;
            let row = load_row(&jobs, &key)?.ok_or_else(|| QueueError::Storage {
                reason: format!("claimable index points at missing job {}", key),
            })?;
            lease_row(txn, &mut jobs, row, &worker, now, lease).map(Some)
        })
        .await
    }

    async fn claim(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        now: Timestamp,
        lease: Duration,
    ) -> QueueResult<Job> {
        let worker = worker.clone();
        self.write_txn(move |txn| {
            let mut jobs = txn.open_table(JOBS).map_err(db_err)?;
            let row = get_row(&jobs, job_id)?;
            if !row.job.is_claimable(now) {
                return Err(QueueError::ClaimLost { job_id });
            }
            lease_row(txn, &mut jobs, row, &worker, now, lease)
        })
        .await
    }

    async fn heartbeat(&self, job_id: JobId, worker: &WorkerId, now: Timestamp) -> QueueResult<()> {
        let worker = worker.clone();
        self.write_txn(move |txn| {
            let mut jobs = txn.open_table(JOBS).map_err(db_err)?;
            let mut row = get_row(&jobs, job_id)?;
            let before = row.job.available_at();
            row.job.renew_lease(&worker, now)?;
            put_row(&mut jobs, &row)?;
            reindex(txn, &row, before, row.job.available_at())?;
            Ok(())
        })
        .await
    }

    async fn complete(&self, job_id: JobId, worker: &WorkerId, now: Timestamp) -> QueueResult<Job> {
        let worker = worker.clone();
        self.write_txn(move |txn| {
            finish_row(txn, job_id, &worker, JobStatus::Succeeded, None, now)
        })
        .await
    }

    async fn fail(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        error: String,
        now: Timestamp,
    ) -> QueueResult<Job> {
        let worker = worker.clone();
        self.write_txn(move |txn| {
            finish_row(txn, job_id, &worker, JobStatus::Failed, Some(error), now)
        })
        .await
    }

    async fn get(&self, job_id: JobId) -> QueueResult<Job> {
        self.read_txn(move |txn| {
            let jobs = txn.open_table(JOBS).map_err(db_err)?;
            let key = job_id.to_string();
            let guard = jobs
                .get(key.as_str())
                .map_err(db_err)?
                .ok_or(QueueError::NotFound { job_id })?;
            let row: JobRow = serde_json::from_slice(guard.value()).map_err(StorageError::from)?;
            Ok(row.job)
        })
        .await
    }

    async fn find_active(&self, key: &DedupeKey) -> QueueResult<Option<Job>> {
        let key = key.clone();
        self.read_txn(move |txn| {
            let active = txn.open_table(ACTIVE_DEDUPE).map_err(db_err)?;
            let Some(job_key) = active
                .get(key.as_str())
                .map_err(db_err)?
                .map(|g| g.value().to_string())
            else {
                return Ok(None);
            };
            let jobs = txn.open_table(JOBS).map_err(db_err)?;
            let row = match jobs.get(job_key.as_str()).map_err(db_err)? {
                Some(guard) => serde_json::from_slice::<JobRow>(guard.value())
                    .map_err(StorageError::from)?,
                None => return Ok(None),
            };
            Ok(Some(row.job))
        })
        .await
    }

    async fn history(&self, key: &DedupeKey) -> QueueResult<Vec<Job>> {
        let key = key.clone();
        self.list_where(move |j| j.dedupe_key == key).await
    }

    async fn jobs_for_entity(&self, entity_id: EntityId) -> QueueResult<Vec<Job>> {
        self.list_where(move |j| j.entity_id == entity_id).await
    }

    async fn list(&self, status: Option<JobStatus>) -> QueueResult<Vec<Job>> {
        self.list_where(move |j| status.is_none_or(|s| j.status == s))
            .await
    }

    async fn runs(&self, job_id: JobId) -> QueueResult<Vec<JobRun>> {
        self.read_txn(move |txn| {
            let table = txn.open_table(JOB_RUNS).map_err(db_err)?;
            let key = job_id.to_string();
            match table.get(key.as_str()).map_err(db_err)? {
                Some(guard) => Ok(serde_json::from_slice(guard.value()).map_err(StorageError::from)?),
                None => Ok(Vec::new()),
            }
        })
        .await
    }
}

impl RedbStore {
    async fn list_where<F>(&self, keep: F) -> QueueResult<Vec<Job>>
    where
        F: Fn(&Job) -> bool + Send + 'static,
    {
        self.read_txn(move |txn| {
            let jobs = txn.open_table(JOBS).map_err(db_err)?;
            Ok(scan_rows(&jobs)?
                .into_iter()
                .map(|r| r.job)
                .filter(|j| keep(j))
                .collect())
        })
        .await
    }
}
