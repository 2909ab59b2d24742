//! Core record/participant parsing and entity mapping for soldb.

pub mod ir;
pub mod model;
pub mod pdl;

pub const CRATE_NAME: &str = "soldb-core";

pub use ir::{parse_lines, HistoryPair, ParseError, Record, RecordFieldError, SolutionType};
pub use model::{Action, ActionParseError, History, HistoryBlob, Player, Puzzle, Solution, Team};
pub use pdl::{
    parse_action_log, ActionCount, ActionLogError, Participant, PdlError, PdlPropertyError,
    TeamType,
};
