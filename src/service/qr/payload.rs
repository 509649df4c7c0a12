//! Tolerant parsing of attendance QR text.
//!
//! Printed badges from several generations are still in circulation, so the
//! parser accepts strict JSON, JSON written with single quotes, and loose
//! `key: value` / `key=value` lists. Every field spelling it understands is
//! listed in `FIELDS`.

use serde_json::{Map, Value};
use tracing::debug;

use super::QrError;
use crate::models::attendance::ScanPayload;

/// Keys under which a whole payload may be nested one level deep.
const WRAPPERS: &[&str] = &["data", "payload", "p"];

#[derive(Debug, Clone, Copy)]
enum Slot {
    TeamId,
    AccessKey,
    MemberId,
}

/// Every accepted spelling per field, canonical name first.
const FIELDS: &[(Slot, &[&str])] = &[
    (Slot::TeamId, &["team_id", "team", "teamId"]),
    (Slot::AccessKey, &["access_key", "accessKey", "key", "access"]),
    (
        Slot::MemberId,
        &["member_id", "memberId", "participant_id", "participantId"],
    ),
];

const SEGMENT_SEPARATORS: &[char] = &[',', ';', '&', '\n', '\r', '{', '}'];
const QUOTES: &[char] = &['"', '\''];

#[derive(Debug, Default)]
struct Extracted {
    team_id: Option<String>,
    access_key: Option<String>,
    member_id: Option<String>,
}

impl Extracted {
    fn slot(&mut self, slot: Slot) -> &mut Option<String> {
        match slot {
            Slot::TeamId => &mut self.team_id,
            Slot::AccessKey => &mut self.access_key,
            Slot::MemberId => &mut self.member_id,
        }
    }
}

/// Normalizes raw QR text into a [`ScanPayload`].
pub fn parse(raw: &str) -> Result<ScanPayload, QrError> {
    let extracted = match json_object(raw).or_else(|| json_object(&relax_quotes(raw))) {
        Some(object) => from_object(&object),
        None => {
            debug!("QR text is not JSON, scanning labeled segments");
            from_segments(raw)
        }
    };

    match extracted {
        Extracted {
            team_id: Some(team_id),
            access_key: Some(access_credential),
            member_id,
        } => Ok(ScanPayload {
            team_id,
            access_credential,
            member_id,
        }),
        _ => Err(QrError::InvalidPayload(
            "Missing required field: team_id or access_key".to_string(),
        )),
    }
}

fn json_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(text.trim()) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Strips one layer of matching outer quotes and turns single quotes into double quotes.
fn relax_quotes(raw: &str) -> String {
    let trimmed = raw.trim();
    let unwrapped = QUOTES
        .iter()
        .find_map(|&quote| {
            trimmed
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
        })
        .unwrap_or(trimmed);
    unwrapped.replace('\'', "\"")
}

fn from_object(object: &Map<String, Value>) -> Extracted {
    let nested: Vec<&Map<String, Value>> = WRAPPERS
        .iter()
        .filter_map(|wrapper| object.get(*wrapper).and_then(Value::as_object))
        .collect();

    let mut extracted = Extracted::default();
    for &(slot, aliases) in FIELDS {
        *extracted.slot(slot) = std::iter::once(object)
            .chain(nested.iter().copied())
            .find_map(|scope| lookup(scope, aliases));
    }
    extracted
}

fn lookup(scope: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|alias| scope.get(*alias).and_then(scalar_text))
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn from_segments(raw: &str) -> Extracted {
    let mut extracted = Extracted::default();
    for segment in raw.split(SEGMENT_SEPARATORS) {
        let Some(split_at) = segment.find([':', '=']) else {
            continue;
        };
        let key = segment[..split_at].trim().trim_matches(QUOTES).trim();
        let value = segment[split_at + 1..].trim().trim_matches(QUOTES).trim();
        if value.is_empty() {
            continue;
        }

        let Some(&(slot, _)) = FIELDS.iter().find(|(_, aliases)| aliases.contains(&key)) else {
            continue;
        };
        let slot = extracted.slot(slot);
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
    extracted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(team_id: &str, key: &str) -> ScanPayload {
        ScanPayload::team(team_id, key)
    }

    #[test]
    fn test_strict_json() {
        let parsed = parse(r#"{"team_id":"HACK2026-001","access_key":"k1"}"#).unwrap();
        assert_eq!(parsed, team("HACK2026-001", "k1"));
    }

    #[test]
    fn test_member_payload() {
        let parsed =
            parse(r#"{"team_id":"T1","member_id":"m-9","access_key":"k1"}"#).unwrap();
        assert_eq!(parsed, ScanPayload::member("T1", "m-9", "k1"));
    }

    #[test]
    fn test_single_quoted_json() {
        let parsed = parse("{'team_id':'T1','access_key':'A1'}").unwrap();
        assert_eq!(parsed, team("T1", "A1"));
    }

    #[test]
    fn test_quoted_json_string() {
        let parsed = parse(r#"'{"team_id":"T1","access_key":"A1"}'"#).unwrap();
        assert_eq!(parsed, team("T1", "A1"));
    }

    #[test]
    fn test_key_value_fallback() {
        assert_eq!(parse("team_id=T1;access_key=A1").unwrap(), team("T1", "A1"));
        assert_eq!(
            parse("team: \"T1\"\naccess_key: 'A1'").unwrap(),
            team("T1", "A1")
        );
    }

    #[test]
    fn test_key_value_keeps_padding_in_value() {
        let parsed = parse("team_id=T1&access_key=abc==").unwrap();
        assert_eq!(parsed.access_credential, "abc==");
    }

    #[test]
    fn test_unknown_object_is_invalid() {
        assert!(matches!(
            parse(r#"{"foo":"bar"}"#),
            Err(QrError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(matches!(
            parse("hello world"),
            Err(QrError::InvalidPayload(_))
        ));
        assert!(matches!(parse(""), Err(QrError::InvalidPayload(_))));
    }

    #[test]
    fn test_aliases_and_trimming() {
        let parsed =
            parse(r#"{"teamId":" T1 ","accessKey":"  A1","participantId":"p-1"}"#).unwrap();
        assert_eq!(parsed, ScanPayload::member("T1", "p-1", "A1"));
    }

    #[test]
    fn test_wrapped_payload() {
        let parsed = parse(r#"{"data":{"team":"T1","key":"A1"}}"#).unwrap();
        assert_eq!(parsed, team("T1", "A1"));

        let parsed = parse(r#"{"v":2,"p":{"team_id":"T1","access":"A1"}}"#).unwrap();
        assert_eq!(parsed, team("T1", "A1"));
    }

    #[test]
    fn test_top_level_wins_over_wrapper() {
        let parsed =
            parse(r#"{"team_id":"T1","data":{"team_id":"T2","access_key":"A2"}}"#).unwrap();
        assert_eq!(parsed, team("T1", "A2"));
    }

    #[test]
    fn test_numeric_values_are_stringified() {
        let parsed = parse(r#"{"team_id":42,"access_key":"A1"}"#).unwrap();
        assert_eq!(parsed.team_id, "42");
    }

    #[test]
    fn test_empty_values_count_as_missing() {
        assert!(matches!(
            parse(r#"{"team_id":"  ","access_key":"A1"}"#),
            Err(QrError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_canonical_wire_parses_back() {
        let payload = ScanPayload::member("HACK2026-003", "0b7f", "Zq9");
        assert_eq!(parse(&payload.to_wire()).unwrap(), payload);
    }
}
