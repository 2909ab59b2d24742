//! Store contract and backends for the solution loader.
//!
//! The loader only ever talks to a [`SolutionStore`]: existence probe by
//! key, idempotent upserts, conflict-checked inserts, and a transaction
//! scoping one record's writes. [`SqliteStore`] is the real backend;
//! [`MemoryStore`] backs tests and `--dry-run`.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use soldb_core::model::{Action, History, HistoryBlob, Player, Puzzle, Solution, Team};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use thiserror::Error;

pub const CRATE_NAME: &str = "soldb-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error("{table} row with key {key} already exists")]
    Conflict { table: &'static str, key: String },
    #[error("no transaction in progress")]
    NoTransaction,
    #[error("simulated transient store failure")]
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Lost connections and pool exhaustion are worth one reconnect-and-retry;
/// anything else is not.
pub fn classify_store_error(err: &StoreError) -> RetryDisposition {
    match err {
        StoreError::Transient => RetryDisposition::Retryable,
        StoreError::Sql(sql_err) => match sql_err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => RetryDisposition::Retryable,
            _ => RetryDisposition::NonRetryable,
        },
        StoreError::Conflict { .. } | StoreError::NoTransaction => RetryDisposition::NonRetryable,
    }
}

/// The persistence contract consumed by the batch loader.
///
/// Upserts are idempotent per key; `insert_solution` fails on a key
/// conflict. `begin`/`commit`/`rollback` scope one record's writes.
#[async_trait]
pub trait SolutionStore: Send {
    async fn begin(&mut self) -> Result<(), StoreError>;
    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;
    /// Tear down and re-establish the backing connection after a transient
    /// failure. Any open transaction is discarded.
    async fn reconnect(&mut self) -> Result<(), StoreError>;

    async fn solution_exists(&mut self, solution_id: i64) -> Result<bool, StoreError>;

    async fn upsert_puzzle(&mut self, puzzle: &Puzzle) -> Result<(), StoreError>;
    async fn upsert_history(&mut self, history: &History) -> Result<(), StoreError>;
    async fn upsert_history_blob(&mut self, blob: &HistoryBlob) -> Result<(), StoreError>;
    async fn upsert_team(&mut self, team: &Team) -> Result<(), StoreError>;
    async fn upsert_player(&mut self, player: &Player) -> Result<(), StoreError>;
    async fn insert_solution(&mut self, solution: &Solution) -> Result<(), StoreError>;
    async fn link_player_solution(
        &mut self,
        player_id: i64,
        solution_id: i64,
    ) -> Result<(), StoreError>;
    async fn insert_action(&mut self, action: &Action) -> Result<(), StoreError>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS puzzle (
        id INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS history (
        id TEXT PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS history_string (
        hash TEXT PRIMARY KEY,
        history_string TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS solution (
        id INTEGER PRIMARY KEY,
        puzzle_id INTEGER NOT NULL REFERENCES puzzle(id),
        history_id TEXT NOT NULL REFERENCES history(id),
        history_hash TEXT NOT NULL REFERENCES history_string(hash),
        solution_type TEXT NOT NULL,
        total_moves INTEGER NOT NULL,
        score REAL NOT NULL,
        timestamp TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS team (
        name TEXT PRIMARY KEY,
        team_type TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS player (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        team_name TEXT NOT NULL REFERENCES team(name)
    )",
    "CREATE TABLE IF NOT EXISTS player_solutions (
        player_id INTEGER NOT NULL REFERENCES player(id),
        solution_id INTEGER NOT NULL REFERENCES solution(id)
    )",
    "CREATE TABLE IF NOT EXISTS action (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action_name TEXT NOT NULL,
        action_n INTEGER NOT NULL,
        player_id INTEGER NOT NULL REFERENCES player(id),
        puzzle_id INTEGER NOT NULL REFERENCES puzzle(id)
    )",
];

/// sqlx/SQLite-backed store. One connection, one writer, one open
/// transaction at a time.
pub struct SqliteStore {
    url: String,
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<SqliteStore, StoreError> {
        let pool = Self::pool_for(url).await?;
        Ok(SqliteStore {
            url: url.to_string(),
            pool,
            tx: None,
        })
    }

    async fn pool_for(url: &str) -> Result<SqlitePool, StoreError> {
        // A single connection keeps in-memory databases coherent and
        // matches the strictly sequential load model.
        Ok(SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?)
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn execute<'q>(
        &mut self,
        query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> Result<(), StoreError> {
        match self.tx.as_mut() {
            Some(tx) => {
                query.execute(&mut **tx).await?;
            }
            None => {
                query.execute(&self.pool).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SolutionStore for SqliteStore {
    async fn begin(&mut self) -> Result<(), StoreError> {
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.tx
            .take()
            .ok_or(StoreError::NoTransaction)?
            .commit()
            .await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), StoreError> {
        self.tx = None;
        self.pool = Self::pool_for(&self.url).await?;
        Ok(())
    }

    async fn solution_exists(&mut self, solution_id: i64) -> Result<bool, StoreError> {
        let query = sqlx::query("SELECT id FROM solution WHERE id = ?").bind(solution_id);
        let row = match self.tx.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        Ok(row.is_some())
    }

    async fn upsert_puzzle(&mut self, puzzle: &Puzzle) -> Result<(), StoreError> {
        self.execute(
            sqlx::query("INSERT INTO puzzle (id) VALUES (?) ON CONFLICT(id) DO NOTHING")
                .bind(puzzle.id),
        )
        .await
    }

    async fn upsert_history(&mut self, history: &History) -> Result<(), StoreError> {
        self.execute(
            sqlx::query("INSERT INTO history (id) VALUES (?) ON CONFLICT(id) DO NOTHING")
                .bind(&history.id),
        )
        .await
    }

    async fn upsert_history_blob(&mut self, blob: &HistoryBlob) -> Result<(), StoreError> {
        self.execute(
            sqlx::query(
                "INSERT INTO history_string (hash, history_string) VALUES (?, ?)
                 ON CONFLICT(hash) DO NOTHING",
            )
            .bind(&blob.hash)
            .bind(&blob.history_string),
        )
        .await
    }

    async fn upsert_team(&mut self, team: &Team) -> Result<(), StoreError> {
        self.execute(
            sqlx::query(
                "INSERT INTO team (name, team_type) VALUES (?, ?)
                 ON CONFLICT(name) DO UPDATE SET team_type = excluded.team_type",
            )
            .bind(&team.name)
            .bind(team.team_type.as_str()),
        )
        .await
    }

    async fn upsert_player(&mut self, player: &Player) -> Result<(), StoreError> {
        self.execute(
            sqlx::query(
                "INSERT INTO player (id, name, team_name) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     team_name = excluded.team_name",
            )
            .bind(player.id)
            .bind(&player.name)
            .bind(&player.team_name),
        )
        .await
    }

    async fn insert_solution(&mut self, solution: &Solution) -> Result<(), StoreError> {
        self.execute(
            sqlx::query(
                "INSERT INTO solution (
                    id, puzzle_id, history_id, history_hash,
                    solution_type, total_moves, score, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(solution.id)
            .bind(solution.puzzle_id)
            .bind(&solution.history_id)
            .bind(&solution.history_hash)
            .bind(solution.solution_type.as_str())
            .bind(solution.total_moves)
            .bind(solution.score)
            .bind(solution.timestamp),
        )
        .await
    }

    async fn link_player_solution(
        &mut self,
        player_id: i64,
        solution_id: i64,
    ) -> Result<(), StoreError> {
        self.execute(
            sqlx::query("INSERT INTO player_solutions (player_id, solution_id) VALUES (?, ?)")
                .bind(player_id)
                .bind(solution_id),
        )
        .await
    }

    async fn insert_action(&mut self, action: &Action) -> Result<(), StoreError> {
        self.execute(
            sqlx::query(
                "INSERT INTO action (action_name, action_n, player_id, puzzle_id)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&action.action_name)
            .bind(action.action_n)
            .bind(action.player_id)
            .bind(action.puzzle_id),
        )
        .await
    }
}

/// Committed table state of a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemTables {
    pub puzzles: BTreeMap<i64, Puzzle>,
    pub histories: BTreeMap<String, History>,
    pub history_blobs: BTreeMap<String, HistoryBlob>,
    pub teams: BTreeMap<String, Team>,
    pub players: BTreeMap<i64, Player>,
    pub solutions: BTreeMap<i64, Solution>,
    pub player_solutions: Vec<(i64, i64)>,
    pub actions: Vec<Action>,
}

/// In-memory store with snapshot transactions.
///
/// `begin` clones the committed tables; writes land on the clone until
/// `commit` swaps it in or `rollback` drops it. `fail_next_commits` and
/// `fail_next_commit_with` inject commit failures for retry tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: MemTables,
    pending: Option<MemTables>,
    commit_errors: VecDeque<StoreError>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn tables(&self) -> &MemTables {
        &self.committed
    }

    /// Make the next `n` commits fail with a transient error.
    pub fn fail_next_commits(&mut self, n: usize) {
        for _ in 0..n {
            self.commit_errors.push_back(StoreError::Transient);
        }
    }

    /// Make the next commit fail with a specific error, after any already
    /// queued failures.
    pub fn fail_next_commit_with(&mut self, err: StoreError) {
        self.commit_errors.push_back(err);
    }

    fn live(&mut self) -> &mut MemTables {
        match self.pending.as_mut() {
            Some(tables) => tables,
            None => &mut self.committed,
        }
    }
}

#[async_trait]
impl SolutionStore for MemoryStore {
    async fn begin(&mut self) -> Result<(), StoreError> {
        self.pending = Some(self.committed.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(err) = self.commit_errors.pop_front() {
            return Err(err);
        }
        self.committed = self.pending.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.pending = None;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), StoreError> {
        self.pending = None;
        Ok(())
    }

    async fn solution_exists(&mut self, solution_id: i64) -> Result<bool, StoreError> {
        Ok(self.live().solutions.contains_key(&solution_id))
    }

    async fn upsert_puzzle(&mut self, puzzle: &Puzzle) -> Result<(), StoreError> {
        self.live().puzzles.insert(puzzle.id, puzzle.clone());
        Ok(())
    }

    async fn upsert_history(&mut self, history: &History) -> Result<(), StoreError> {
        self.live()
            .histories
            .insert(history.id.clone(), history.clone());
        Ok(())
    }

    async fn upsert_history_blob(&mut self, blob: &HistoryBlob) -> Result<(), StoreError> {
        self.live()
            .history_blobs
            .insert(blob.hash.clone(), blob.clone());
        Ok(())
    }

    async fn upsert_team(&mut self, team: &Team) -> Result<(), StoreError> {
        self.live().teams.insert(team.name.clone(), team.clone());
        Ok(())
    }

    async fn upsert_player(&mut self, player: &Player) -> Result<(), StoreError> {
        self.live().players.insert(player.id, player.clone());
        Ok(())
    }

    async fn insert_solution(&mut self, solution: &Solution) -> Result<(), StoreError> {
        let tables = self.live();
        if tables.solutions.contains_key(&solution.id) {
            return Err(StoreError::Conflict {
                table: "solution",
                key: solution.id.to_string(),
            });
        }
        tables.solutions.insert(solution.id, solution.clone());
        Ok(())
    }

    async fn link_player_solution(
        &mut self,
        player_id: i64,
        solution_id: i64,
    ) -> Result<(), StoreError> {
        self.live().player_solutions.push((player_id, solution_id));
        Ok(())
    }

    async fn insert_action(&mut self, action: &Action) -> Result<(), StoreError> {
        self.live().actions.push(action.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use soldb_core::ir::SolutionType;

    fn sample_solution(id: i64) -> Solution {
        Solution {
            id,
            puzzle_id: 7,
            history_id: "V3".to_string(),
            history_hash: "f".repeat(64),
            solution_type: SolutionType::Regular,
            total_moves: 19,
            score: 134.2,
            timestamp: Utc.with_ymd_and_hms(2017, 9, 28, 0, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn transient_errors_are_retryable_and_conflicts_are_not() {
        assert_eq!(
            classify_store_error(&StoreError::Transient),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_store_error(&StoreError::Conflict {
                table: "solution",
                key: "1".to_string()
            }),
            RetryDisposition::NonRetryable
        );
    }

    #[tokio::test]
    async fn memory_upserts_are_idempotent_and_inserts_conflict() {
        let mut store = MemoryStore::new();
        let puzzle = Puzzle { id: 7 };
        store.upsert_puzzle(&puzzle).await.unwrap();
        store.upsert_puzzle(&puzzle).await.unwrap();
        assert_eq!(store.tables().puzzles.len(), 1);

        store.insert_solution(&sample_solution(1)).await.unwrap();
        let err = store.insert_solution(&sample_solution(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { table: "solution", .. }));
    }

    #[tokio::test]
    async fn memory_rollback_discards_and_commit_keeps_writes() {
        let mut store = MemoryStore::new();

        store.begin().await.unwrap();
        store.insert_solution(&sample_solution(1)).await.unwrap();
        assert!(store.solution_exists(1).await.unwrap());
        store.rollback().await.unwrap();
        assert!(!store.solution_exists(1).await.unwrap());

        store.begin().await.unwrap();
        store.insert_solution(&sample_solution(1)).await.unwrap();
        store.commit().await.unwrap();
        assert!(store.solution_exists(1).await.unwrap());
    }

    #[tokio::test]
    async fn memory_commit_failure_injection_is_transient_and_bounded() {
        let mut store = MemoryStore::new();
        store.fail_next_commits(1);

        store.begin().await.unwrap();
        store.insert_solution(&sample_solution(1)).await.unwrap();
        let err = store.commit().await.unwrap_err();
        assert_eq!(classify_store_error(&err), RetryDisposition::Retryable);
        store.rollback().await.unwrap();

        store.begin().await.unwrap();
        store.insert_solution(&sample_solution(1)).await.unwrap();
        store.commit().await.unwrap();
        assert!(store.solution_exists(1).await.unwrap());
    }

    #[tokio::test]
    async fn sqlite_round_trip_upserts_and_detects_duplicates() {
        let mut store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.init_schema().await.unwrap();

        store.upsert_puzzle(&Puzzle { id: 7 }).await.unwrap();
        store.upsert_puzzle(&Puzzle { id: 7 }).await.unwrap();
        store
            .upsert_history(&History {
                id: "V3".to_string(),
            })
            .await
            .unwrap();
        store
            .upsert_history_blob(&HistoryBlob {
                hash: "f".repeat(64),
                history_string: "V1:10,V2:5,V3:4".to_string(),
            })
            .await
            .unwrap();

        assert!(!store.solution_exists(1).await.unwrap());
        store.insert_solution(&sample_solution(1)).await.unwrap();
        assert!(store.solution_exists(1).await.unwrap());
        assert!(store.insert_solution(&sample_solution(1)).await.is_err());
    }

    #[tokio::test]
    async fn sqlite_rollback_scopes_a_record_unit_of_work() {
        let mut store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.init_schema().await.unwrap();

        store.begin().await.unwrap();
        store.upsert_puzzle(&Puzzle { id: 7 }).await.unwrap();
        store.insert_solution(&sample_solution(1)).await.unwrap();
        store.rollback().await.unwrap();
        assert!(!store.solution_exists(1).await.unwrap());

        store.begin().await.unwrap();
        store.upsert_puzzle(&Puzzle { id: 7 }).await.unwrap();
        store.insert_solution(&sample_solution(1)).await.unwrap();
        store.commit().await.unwrap();
        assert!(store.solution_exists(1).await.unwrap());
    }
}
