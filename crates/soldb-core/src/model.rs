//! Relational entity values derived from records and participants.
//!
//! Each entity carries an explicit constructor for its one idiosyncratic
//! source (a validated record or a parsed participant). Constructors add no
//! validation of their own; they surface exactly the field-level error of
//! the accessor they read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{Record, RecordFieldError, SolutionType};
use crate::pdl::{parse_action_log, ActionLogError, Participant, PdlPropertyError, TeamType};

/// Keyed by puzzle id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: i64,
}

impl Puzzle {
    pub fn from_record(record: &Record) -> Result<Puzzle, RecordFieldError> {
        Ok(Puzzle {
            id: record.puzzle_id()?,
        })
    }
}

/// One row per submission, keyed by solution id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub id: i64,
    pub puzzle_id: i64,
    pub history_id: String,
    pub history_hash: String,
    pub solution_type: SolutionType,
    pub total_moves: i64,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

impl Solution {
    pub fn from_record(record: &Record) -> Result<Solution, RecordFieldError> {
        Ok(Solution {
            id: record.solution_id()?,
            puzzle_id: record.puzzle_id()?,
            history_id: record.history_id()?.to_string(),
            history_hash: record.history_hash()?.to_string(),
            solution_type: record.solution_type()?,
            total_moves: record.total_moves()?,
            score: record.score()?,
            timestamp: record.timestamp()?,
        })
    }
}

/// One row per distinct version id ever observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub id: String,
}

impl History {
    /// The terminal version id, persisted for every solution.
    pub fn last_from_record(record: &Record) -> Result<History, RecordFieldError> {
        Ok(History {
            id: record.history_id()?.to_string(),
        })
    }

    /// The full lineage decomposition, one History per `ID:N` pair.
    ///
    /// Only top solutions warrant persisting intermediate version ids;
    /// regular solutions share lineages by the million and store only the
    /// terminal id.
    pub fn all_from_record(record: &Record) -> Result<Vec<History>, RecordFieldError> {
        Ok(record
            .history_pairs()?
            .iter()
            .map(|pair| History {
                id: pair.id.clone(),
            })
            .collect())
    }
}

/// The full raw history string, stored once per distinct content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBlob {
    pub hash: String,
    pub history_string: String,
}

impl HistoryBlob {
    pub fn from_record(record: &Record) -> Result<HistoryBlob, RecordFieldError> {
        Ok(HistoryBlob {
            hash: record.history_hash()?.to_string(),
            history_string: record.history_string()?.to_string(),
        })
    }
}

/// Keyed by the (soloist-disambiguated) team name, never by team id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub team_type: TeamType,
}

impl Team {
    pub fn from_participant(participant: &Participant) -> Team {
        Team {
            name: participant.team_name.clone(),
            team_type: participant.team_type,
        }
    }
}

/// Keyed by player id; associated with solutions through a link table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub team_name: String,
}

impl Player {
    pub fn from_participant(participant: &Participant) -> Player {
        Player {
            id: participant.player_id,
            name: participant.player_name.clone(),
            team_name: participant.team_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionParseError {
    #[error(transparent)]
    MissingLog(#[from] PdlPropertyError),
    #[error(transparent)]
    BadCount(#[from] ActionLogError),
}

/// One `(player, action)` occurrence; repeated occurrences across PDL
/// entries stay distinct rows, so there is no natural key here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub action_name: String,
    pub action_n: i64,
    pub player_id: i64,
    pub puzzle_id: i64,
}

impl Action {
    /// Zero or more action rows from a participant's action log.
    pub fn from_participant(
        participant: &Participant,
        puzzle_id: i64,
    ) -> Result<Vec<Action>, ActionParseError> {
        let log = participant.action_log()?;
        let actions = parse_action_log(log)?
            .into_iter()
            .map(|entry| Action {
                action_name: entry.name,
                action_n: entry.count,
                player_id: participant.player_id,
                puzzle_id,
            })
            .collect();
        Ok(actions)
    }
}
