//! Batch load orchestration: per-record mapping, dependency-ordered
//! upserts, deduplication, and failure isolation across a record stream.

use soldb_core::ir::{ParseError, Record, RecordFieldError, SolutionType};
use soldb_core::model::{Action, ActionParseError, History, HistoryBlob, Player, Puzzle, Solution, Team};
use soldb_core::pdl::{ActionLogError, Participant, PdlError};
use soldb_store::{classify_store_error, RetryDisposition, SolutionStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "soldb-load";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Field(#[from] RecordFieldError),
    #[error(transparent)]
    Pdl(#[from] PdlError),
    #[error(transparent)]
    ActionLog(#[from] ActionLogError),
    #[error("solution {0} is already loaded")]
    Duplicate(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a batch reacts to invalid records: skip-and-log or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    Strict,
    Lenient,
}

/// Terminal state of one record's load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Committed,
    SkippedDuplicate,
    SkippedInvalid,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub committed: usize,
    pub skipped_duplicate: usize,
    pub skipped_invalid: usize,
    pub failed: usize,
    pub parse_errors: usize,
}

impl BatchSummary {
    fn tally(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Committed => self.committed += 1,
            LoadOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            LoadOutcome::SkippedInvalid => self.skipped_invalid += 1,
            LoadOutcome::Failed => self.failed += 1,
        }
    }
}

/// Sequential, single-writer loader over a [`SolutionStore`].
///
/// Records are processed strictly one at a time so that upserts for shared
/// parent keys (puzzle id, team name, player id) never race. Each record's
/// writes form one transactional unit of work.
pub struct Loader<S: SolutionStore> {
    store: S,
}

impl<S: SolutionStore> Loader<S> {
    pub fn new(store: S) -> Loader<S> {
        Loader { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Load one record, surfacing the first error to the caller.
    ///
    /// An already-loaded solution is an error here; single loads expect the
    /// caller to have deduplicated in advance. Batch loads expect overlap
    /// from re-scraped pages and skip silently instead.
    pub async fn load_record(&mut self, record: &Record) -> Result<(), LoadError> {
        match self.load_once(record).await? {
            LoadOutcome::SkippedDuplicate => Err(LoadError::Duplicate(record.solution_id()?)),
            _ => Ok(()),
        }
    }

    /// Load a stream of parsed records, isolating per-record failures.
    ///
    /// Under [`LoadPolicy::Lenient`] every malformed or duplicate record is
    /// logged and skipped and the batch always runs to completion; under
    /// [`LoadPolicy::Strict`] the first validation failure aborts. A
    /// non-transient storage failure aborts the batch in either mode.
    pub async fn load_batch<I>(
        &mut self,
        records: I,
        policy: LoadPolicy,
    ) -> Result<BatchSummary, LoadError>
    where
        I: IntoIterator<Item = Result<Record, ParseError>>,
    {
        let mut summary = BatchSummary::default();
        for parsed in records {
            let record = match parsed {
                Ok(record) => record,
                Err(parse_err) => {
                    if policy == LoadPolicy::Strict {
                        return Err(parse_err.into());
                    }
                    warn!(error = %parse_err, "skipping unparseable input line");
                    summary.parse_errors += 1;
                    continue;
                }
            };

            let outcome = match self.load_with_retry(&record).await {
                Ok(outcome) => outcome,
                Err(
                    validation_err @ (LoadError::Field(_)
                    | LoadError::Pdl(_)
                    | LoadError::ActionLog(_)),
                ) => {
                    if policy == LoadPolicy::Strict {
                        return Err(validation_err);
                    }
                    warn!(error = %validation_err, "skipping invalid record");
                    LoadOutcome::SkippedInvalid
                }
                Err(other) => return Err(other),
            };

            if outcome == LoadOutcome::SkippedDuplicate {
                debug!(
                    solution_id = record.solution_id().ok(),
                    "skipping already-loaded solution"
                );
            }
            summary.tally(outcome);
        }

        info!(
            committed = summary.committed,
            skipped_duplicate = summary.skipped_duplicate,
            skipped_invalid = summary.skipped_invalid,
            failed = summary.failed,
            parse_errors = summary.parse_errors,
            "batch load finished"
        );
        Ok(summary)
    }

    /// One load attempt plus a single rollback-reconnect-retry on a
    /// transient storage failure. The retry is best-effort: any storage
    /// failure on the second attempt abandons the record.
    async fn load_with_retry(&mut self, record: &Record) -> Result<LoadOutcome, LoadError> {
        match self.load_once(record).await {
            Err(LoadError::Store(store_err))
                if classify_store_error(&store_err) == RetryDisposition::Retryable =>
            {
                warn!(error = %store_err, "transient store failure, reconnecting to retry record once");
                let _ = self.store.rollback().await;
                self.store.reconnect().await?;
                match self.load_once(record).await {
                    Err(LoadError::Store(second_err)) => {
                        warn!(error = %second_err, "record abandoned after retry");
                        let _ = self.store.rollback().await;
                        Ok(LoadOutcome::Failed)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn load_once(&mut self, record: &Record) -> Result<LoadOutcome, LoadError> {
        let solution = Solution::from_record(record)?;
        let puzzle = Puzzle::from_record(record)?;
        let last_history = History::last_from_record(record)?;
        let blob = HistoryBlob::from_record(record)?;

        if self.store.solution_exists(solution.id).await? {
            return Ok(LoadOutcome::SkippedDuplicate);
        }

        // Participants parse before any write, so a corrupted participant
        // never leaves a partially associated record behind.
        let participants = Participant::parse_all(record)?;

        self.store.begin().await?;
        match self
            .write_record(record, &solution, &puzzle, &last_history, &blob, &participants)
            .await
        {
            Ok(()) => {
                self.store.commit().await?;
                Ok(LoadOutcome::Committed)
            }
            Err(write_err) => {
                if let Err(rollback_err) = self.store.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(write_err)
            }
        }
    }

    /// Dependency-ordered writes for one record: parents before Solution,
    /// Team before Player before the association, top-solution extras last.
    async fn write_record(
        &mut self,
        record: &Record,
        solution: &Solution,
        puzzle: &Puzzle,
        last_history: &History,
        blob: &HistoryBlob,
        participants: &[Participant],
    ) -> Result<(), LoadError> {
        self.store.upsert_puzzle(puzzle).await?;
        self.store.upsert_history(last_history).await?;
        self.store.upsert_history_blob(blob).await?;
        self.store.insert_solution(solution).await?;

        for participant in participants {
            let team = Team::from_participant(participant);
            let player = Player::from_participant(participant);
            self.store.upsert_team(&team).await?;
            self.store.upsert_player(&player).await?;
            self.store
                .link_player_solution(player.id, solution.id)
                .await?;
        }

        if solution.solution_type == SolutionType::Top {
            // Backfill intermediate version ids; the terminal one is
            // already in.
            let histories = History::all_from_record(record)?;
            if let Some((_, intermediate)) = histories.split_last() {
                for history in intermediate {
                    self.store.upsert_history(history).await?;
                }
            }

            for participant in participants {
                match Action::from_participant(participant, puzzle.id) {
                    Ok(actions) => {
                        for action in &actions {
                            self.store.insert_action(action).await?;
                        }
                    }
                    Err(ActionParseError::MissingLog(missing)) => {
                        debug!(error = %missing, "top solution participant has no action log");
                    }
                    Err(ActionParseError::BadCount(bad_count)) => {
                        return Err(bad_count.into());
                    }
                }
            }
        }

        Ok(())
    }
}
