//! Processing state machine
//!
//! Owns each statement's status and the per-statement execution lock. A stage
//! runs only while its `StageRun` is alive; dropping the run releases the lock.
//! Every transition is persisted before the stage's work begins, so a crashed
//! run stays visibly in progress and can be resumed with `retry`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as StageLock, OwnedMutexGuard};
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{Stage, Statement, StatementStatus, StatusReport};
use crate::storage::Storage;

/// Cooperative cancellation signal checked between units of work
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// States a stage may start from
pub fn legal_sources(stage: Stage) -> &'static [StatementStatus] {
    match stage {
        Stage::Extraction => &[StatementStatus::Uploaded, StatementStatus::ExtractFailed],
        Stage::Categorization => &[StatementStatus::Extracted, StatementStatus::CategorizeFailed],
    }
}

/// The stage a statement would run next from its current status
fn pending_stage(status: StatementStatus) -> Stage {
    match status {
        StatementStatus::Uploaded | StatementStatus::Extracting | StatementStatus::ExtractFailed => {
            Stage::Extraction
        }
        _ => Stage::Categorization,
    }
}

/// A statement's execution lock and the flag status polling reads
#[derive(Clone, Default)]
struct StatementLock {
    lock: Arc<StageLock<()>>,
    running: Arc<AtomicBool>,
}

/// Held execution lock; clears the running flag when released
struct InFlight {
    running: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// A stage holding its statement's execution lock
pub struct StageRun {
    pub statement: Statement,
    pub stage: Stage,
    _guard: InFlight,
}

impl std::fmt::Debug for StageRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRun")
            .field("statement_id", &self.statement.id)
            .field("stage", &self.stage)
            .finish()
    }
}

pub struct StateMachine<S> {
    storage: Arc<S>,
    locks: Mutex<HashMap<i64, StatementLock>>,
    max_stage_retries: u32,
}

impl<S: Storage> StateMachine<S> {
    pub fn new(storage: Arc<S>, max_stage_retries: u32) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
            max_stage_retries,
        }
    }

    fn lock_for(&self, statement_id: i64) -> StatementLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Locks nobody holds or waits on can go
        locks.retain(|id, slot| *id == statement_id || Arc::strong_count(&slot.lock) > 1);
        locks.entry(statement_id).or_default().clone()
    }

    /// Take the statement's execution lock without waiting
    fn acquire(&self, statement_id: i64) -> Result<InFlight> {
        let slot = self.lock_for(statement_id);
        let guard = slot
            .lock
            .try_lock_owned()
            .map_err(|_| Error::AlreadyInProgress(statement_id))?;
        slot.running.store(true, Ordering::SeqCst);
        Ok(InFlight {
            running: slot.running,
            _guard: guard,
        })
    }

    /// Whether a stage is executing for this statement right now
    ///
    /// Reads the running flag only, so polling never contends with `acquire`.
    pub fn is_in_flight(&self, statement_id: i64) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(&statement_id)
            .map(|slot| slot.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn transition(
        &self,
        statement: &mut Statement,
        to: StatementStatus,
        error: Option<&Error>,
    ) -> Result<()> {
        self.storage.save_statement_status(statement.id, to, error)?;
        info!(
            statement_id = statement.id,
            from = %statement.status,
            to = %to,
            "Statement transition"
        );
        statement.status = to;
        statement.error_message = error.map(|e| e.to_string());
        statement.error_kind = error.map(|e| e.kind().to_string());
        Ok(())
    }

    /// Start a stage
    ///
    /// Fails with `AlreadyInProgress` if another run holds the statement, and
    /// with `InvalidTransition` if the current status does not precede the stage.
    pub fn advance(&self, statement_id: i64, stage: Stage) -> Result<StageRun> {
        let guard = self.acquire(statement_id)?;
        let mut statement = self.storage.load_statement(statement_id)?;

        if !legal_sources(stage).contains(&statement.status) {
            return Err(Error::InvalidTransition {
                from: statement.status,
                stage,
            });
        }

        self.transition(&mut statement, stage.in_progress(), None)?;
        Ok(StageRun {
            statement,
            stage,
            _guard: guard,
        })
    }

    /// Mark a stage successful and release the lock
    pub fn complete(&self, run: StageRun) -> Result<Statement> {
        let StageRun {
            mut statement,
            stage,
            _guard,
        } = run;
        self.transition(&mut statement, stage.succeeded(), None)?;
        Ok(statement)
    }

    /// Mark a stage failed with its error and release the lock
    pub fn fail(&self, run: StageRun, error: &Error) -> Result<Statement> {
        let StageRun {
            mut statement,
            stage,
            _guard,
        } = run;
        self.transition(&mut statement, stage.failed(), Some(error))?;
        Ok(statement)
    }

    /// Re-enter the in-progress state of a failed or abandoned stage
    ///
    /// Legal from a failure state, or from an in-progress state whose run is no
    /// longer executing. Each stage may be retried `max_stage_retries` times.
    pub fn retry(&self, statement_id: i64) -> Result<StageRun> {
        let guard = self.acquire(statement_id)?;
        let mut statement = self.storage.load_statement(statement_id)?;

        let status = statement.status;
        let stage = match status.active_stage() {
            Some(stage) if status.is_failed() || status.is_in_progress() => stage,
            _ => {
                return Err(Error::InvalidTransition {
                    from: status,
                    stage: pending_stage(status),
                })
            }
        };

        let attempts = statement.retries_for(stage);
        if attempts >= self.max_stage_retries {
            return Err(Error::RetryLimitExceeded { stage, attempts });
        }

        let retries = self.storage.increment_retry(statement_id, stage)?;
        match stage {
            Stage::Extraction => statement.extraction_retries = retries,
            Stage::Categorization => statement.categorization_retries = retries,
        }

        info!(statement_id, stage = %stage, attempt = retries, "Retrying stage");
        self.transition(&mut statement, stage.in_progress(), None)?;
        Ok(StageRun {
            statement,
            stage,
            _guard: guard,
        })
    }

    /// Side-effect free status snapshot
    pub fn status(&self, statement_id: i64) -> Result<StatusReport> {
        let statement = self.storage.load_statement(statement_id)?;
        let in_flight = self.is_in_flight(statement_id);
        Ok(status_report(&statement, in_flight, self.max_stage_retries))
    }
}

/// Build the polling view of a statement
pub fn status_report(statement: &Statement, in_flight: bool, max_stage_retries: u32) -> StatusReport {
    let status = statement.status;
    let retry_available = match status.active_stage() {
        Some(stage) if status.is_failed() || (status.is_in_progress() && !in_flight) => {
            statement.retries_for(stage) < max_stage_retries
        }
        _ => false,
    };
    let extracted = statement.extracted_at.is_some();
    let counter = |value: u32| extracted.then_some(value);

    StatusReport {
        statement_id: statement.id,
        status,
        current_step: status.current_step(),
        progress_percentage: status.progress_percentage(),
        in_flight,
        error_message: statement.error_message.clone(),
        error_kind: statement.error_kind.clone(),
        retry_available,
        extraction_retries: statement.extraction_retries,
        categorization_retries: statement.categorization_retries,
        found_count: counter(statement.found_count),
        dropped_count: counter(statement.dropped_count),
        excluded_count: counter(statement.excluded_count),
        period: statement.period.clone(),
        uploaded_at: statement.uploaded_at,
        extraction_started_at: statement.extraction_started_at,
        extracted_at: statement.extracted_at,
        categorization_started_at: statement.categorization_started_at,
        completed_at: statement.completed_at,
        failed_at: statement.failed_at,
    }
}
