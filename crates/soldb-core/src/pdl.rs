//! Player-description-line (PDL) parsing.
//!
//! One PDL string describes one contributor to a solution:
//! `"<marker> name,team,player_id,team_id[,...][LOG:<action tokens>]"`
//! where the marker is one or more `.`/`^` characters followed by a space.

use thiserror::Error;

use crate::ir::Record;

/// The literal team name the scrape uses for players without a group.
pub const NO_GROUP: &str = "[no group]";

/// Fallback name for action tokens whose name portion is empty.
pub const UNKNOWN_ACTION: &str = "UnknownAction";

/// A malformed participant entry, scoped to that one entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PdlError {
    #[error("pdl line is missing its `.`/`^` marker prefix")]
    MissingMarker,
    #[error("pdl line has {found} comma-separated fields, expected at least 4")]
    TooFewFields { found: usize },
    #[error("pdl player id `{0}` is not an integer")]
    InvalidPlayerId(String),
    #[error("pdl team id `{0}` is not an integer")]
    InvalidTeamId(String),
    #[error(transparent)]
    Record(#[from] crate::ir::RecordFieldError),
}

/// A participant property that is absent rather than malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("participant `{player_name}` has no LOG: section")]
pub struct PdlPropertyError {
    pub player_name: String,
}

/// A non-numeric count inside an action log invalidates the whole log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("action token `{token}` has a non-numeric count")]
pub struct ActionLogError {
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TeamType {
    Soloist,
    Evolver,
}

impl TeamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamType::Soloist => "soloist",
            TeamType::Evolver => "evolver",
        }
    }
}

/// One contributor to a solution, parsed from one PDL string.
///
/// Soloists all share the literal team name `[no group]` and team id 0 in
/// the scrape, which would merge every unrelated solo player into one team.
/// The team name is therefore rewritten to `"{team_name}-{player_name}"` at
/// parse time, so every downstream consumer sees the disambiguated name.
/// The team id is kept only for reference; it is never a storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub player_name: String,
    pub team_name: String,
    pub player_id: i64,
    pub team_id: i64,
    pub team_type: TeamType,
    action_log: Option<String>,
}

impl Participant {
    /// Parse one raw PDL string.
    pub fn parse(raw: &str) -> Result<Participant, PdlError> {
        let marker_len = raw
            .bytes()
            .take_while(|b| *b == b'.' || *b == b'^')
            .count();
        if marker_len == 0 || !raw[marker_len..].starts_with(' ') {
            return Err(PdlError::MissingMarker);
        }

        let body = &raw[marker_len + 1..];
        let fields: Vec<&str> = body.split(',').collect();
        if fields.len() < 4 {
            return Err(PdlError::TooFewFields {
                found: fields.len(),
            });
        }

        let player_name = fields[0]
            .trim_matches(|c| c == '.' || c == '^' || c == ' ')
            .to_string();
        let raw_team = fields[1].to_string();
        let player_id = fields[2]
            .trim()
            .parse::<i64>()
            .map_err(|_| PdlError::InvalidPlayerId(fields[2].to_string()))?;
        let team_id = fields[3]
            .trim()
            .parse::<i64>()
            .map_err(|_| PdlError::InvalidTeamId(fields[3].to_string()))?;

        let (team_type, team_name) = if raw_team == NO_GROUP {
            (TeamType::Soloist, format!("{raw_team}-{player_name}"))
        } else {
            (TeamType::Evolver, raw_team)
        };

        // Only the remainder past the four required fields may carry a
        // LOG: marker; a name or team containing "LOG:" is just a name.
        let action_log = body.splitn(5, ',').nth(4).and_then(|rest| {
            rest.find("LOG:")
                .map(|start| rest[start + "LOG:".len()..].trim().to_string())
        });

        Ok(Participant {
            player_name,
            team_name,
            player_id,
            team_id,
            team_type,
            action_log,
        })
    }

    /// Parse every PDL string on a record, preserving order and duplicates.
    ///
    /// The same player may legitimately appear more than once.
    pub fn parse_all(record: &Record) -> Result<Vec<Participant>, PdlError> {
        record
            .pdl_strings()?
            .iter()
            .map(|raw| Participant::parse(raw))
            .collect()
    }

    /// The raw action-log substring following the `LOG:` marker.
    pub fn action_log(&self) -> Result<&str, PdlPropertyError> {
        self.action_log.as_deref().ok_or_else(|| PdlPropertyError {
            player_name: self.player_name.clone(),
        })
    }
}

/// One `(action name, count)` pair from an action log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCount {
    pub name: String,
    pub count: i64,
}

/// Parse an action log of whitespace-separated `[ctx|]name[=count]` tokens.
///
/// A context prefix before `|` is concatenated into the name, a missing
/// `=count` defaults to 0, and an empty resulting name maps to
/// [`UNKNOWN_ACTION`].
pub fn parse_action_log(log: &str) -> Result<Vec<ActionCount>, ActionLogError> {
    log.split_whitespace()
        .map(|token| {
            let (context, rest) = token.split_once('|').unwrap_or(("", token));
            let (name_part, count) = match rest.split_once('=') {
                Some((name_part, raw_count)) => {
                    let count = raw_count.parse::<i64>().map_err(|_| ActionLogError {
                        token: token.to_string(),
                    })?;
                    (name_part, count)
                }
                None => (rest, 0),
            };
            let name = format!("{context}{name_part}");
            Ok(ActionCount {
                name: if name.is_empty() {
                    UNKNOWN_ACTION.to_string()
                } else {
                    name
                },
                count,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_four_required_fields() {
        let participant = Participant::parse(". bill,myteam,100,200").unwrap();
        assert_eq!(participant.player_name, "bill");
        assert_eq!(participant.team_name, "myteam");
        assert_eq!(participant.player_id, 100);
        assert_eq!(participant.team_id, 200);
        assert_eq!(participant.team_type, TeamType::Evolver);
    }

    #[test]
    fn accepts_longer_dot_and_caret_markers() {
        let participant = Participant::parse("^^. bill,myteam,100,200").unwrap();
        assert_eq!(participant.player_name, "bill");
    }

    #[test]
    fn rejects_a_missing_marker() {
        assert_eq!(
            Participant::parse("bill,myteam,100,200").unwrap_err(),
            PdlError::MissingMarker
        );
    }

    #[test]
    fn rejects_too_few_fields() {
        assert_eq!(
            Participant::parse(". bill,myteam,100").unwrap_err(),
            PdlError::TooFewFields { found: 3 }
        );
    }

    #[test]
    fn rejects_non_integer_ids() {
        assert!(matches!(
            Participant::parse(". bill,myteam,abc,200").unwrap_err(),
            PdlError::InvalidPlayerId(_)
        ));
        assert!(matches!(
            Participant::parse(". bill,myteam,100,xyz").unwrap_err(),
            PdlError::InvalidTeamId(_)
        ));
    }

    #[test]
    fn soloists_get_a_unique_synthetic_team_name() {
        let participant = Participant::parse(". bill,[no group],100,0").unwrap();
        assert_eq!(participant.team_type, TeamType::Soloist);
        assert_eq!(participant.team_name, "[no group]-bill");
    }

    #[test]
    fn captures_the_action_log_substring() {
        let participant =
            Participant::parse(". bill,myteam,100,200,LOG: |ActionBandDelete=5").unwrap();
        assert_eq!(participant.action_log().unwrap(), "|ActionBandDelete=5");
    }

    #[test]
    fn a_log_substring_inside_a_name_is_not_a_marker() {
        let participant = Participant::parse(". BLOG:ger,myteam,100,200").unwrap();
        assert_eq!(participant.player_name, "BLOG:ger");
        assert!(participant.action_log().is_err());

        let participant =
            Participant::parse(". bill,CATALOG:team,100,200,LOG: |ActionPull=2").unwrap();
        assert_eq!(participant.team_name, "CATALOG:team");
        assert_eq!(participant.action_log().unwrap(), "|ActionPull=2");
    }

    #[test]
    fn missing_action_log_is_a_property_error() {
        let participant = Participant::parse(". bill,myteam,100,200").unwrap();
        let err = participant.action_log().unwrap_err();
        assert_eq!(err.player_name, "bill");
    }

    #[test]
    fn parse_all_preserves_order_and_duplicates() {
        let record = crate::ir::Record::parse(
            r#"{"FILEPATH":"/location/all/s.pdb","PDL":[". Blipperman,t,1,2",". Skippysk8s,t,3,2",". Blipperman,t,1,2"]}"#,
        )
        .unwrap();
        let participants = Participant::parse_all(&record).unwrap();
        assert_eq!(participants.len(), 3);
        assert_eq!(participants[0].player_name, "Blipperman");
        assert_eq!(participants[1].player_name, "Skippysk8s");
        assert_eq!(participants[0], participants[2]);
    }

    #[test]
    fn action_log_tokens_parse_into_name_count_pairs() {
        let actions =
            parse_action_log("|ActionBandAddAtomAtom=6 |ActionBandDelete=5 |ActionDeleteCut=8")
                .unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].name, "ActionBandAddAtomAtom");
        assert_eq!(actions[0].count, 6);
    }

    #[test]
    fn context_prefixes_and_empty_names_are_normalized() {
        let actions = parse_action_log(
            "Pull_Mode|ACTIVATE=3 Selection_Interface|BringUpTweakWidget=5 Structure_Mode|ACTIVATE=3 |=8",
        )
        .unwrap();
        assert_eq!(actions.len(), 4);
        assert_eq!(actions[0].name, "Pull_ModeACTIVATE");
        assert_eq!(actions[0].count, 3);
        assert_eq!(actions[1].name, "Selection_InterfaceBringUpTweakWidget");
        assert_eq!(actions[3].name, UNKNOWN_ACTION);
        assert_eq!(actions[3].count, 8);
    }

    #[test]
    fn tokens_without_a_count_default_to_zero() {
        let actions = parse_action_log("|ActionNoCount").unwrap();
        assert_eq!(actions[0].name, "ActionNoCount");
        assert_eq!(actions[0].count, 0);
    }

    #[test]
    fn a_non_numeric_count_fails_the_whole_log() {
        let err = parse_action_log("|ActionA=3 |ActionB=x").unwrap_err();
        assert_eq!(err.token, "|ActionB=x");
    }
}
