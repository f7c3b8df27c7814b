//! Records and collections.
//!
//! Task/note/message/credential business rules live in the UI layer; the
//! vault only needs each record to be a JSON object with an optional `id`.

use chrono::NaiveDateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtoError;

const ID_LEN: usize = 6;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// One task, note, message or credential, kept as an opaque JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn from_value(value: Value) -> Result<Self, ProtoError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProtoError::Format(format!("record must be an object, got {other}"))),
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.0.get("id").filter(|v| !v.is_null() && v.as_str() != Some(""))
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert("id".into(), Value::String(id.into()));
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Copy without client-only fields (keys starting with `_`).
    pub fn without_transient(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Which collection a shared record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Item,
    Note,
    Message,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Note => "note",
            Self::Message => "message",
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(Self::Item),
            "note" => Ok(Self::Note),
            "message" => Ok(Self::Message),
            other => Err(ProtoError::Format(format!("unknown record type '{other}'"))),
        }
    }
}

/// Entire application state, in the order it is serialized into the vault.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppState {
    pub items: Vec<Record>,
    pub notes: Vec<Record>,
    #[serde(default)]
    pub messages: Vec<Record>,
    #[serde(default)]
    pub passwords: Vec<Record>,
}

/// The part of the state replicated over a collaboration channel.
/// Credentials never leave the vault this way.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Collections {
    pub items: Vec<Record>,
    pub notes: Vec<Record>,
    #[serde(default)]
    pub messages: Vec<Record>,
}

impl AppState {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
            && self.notes.is_empty()
            && self.messages.is_empty()
            && self.passwords.is_empty()
    }

    pub fn collection(&self, kind: RecordKind) -> &[Record] {
        match kind {
            RecordKind::Item => &self.items,
            RecordKind::Note => &self.notes,
            RecordKind::Message => &self.messages,
        }
    }

    fn collection_mut(&mut self, kind: RecordKind) -> &mut Vec<Record> {
        match kind {
            RecordKind::Item => &mut self.items,
            RecordKind::Note => &mut self.notes,
            RecordKind::Message => &mut self.messages,
        }
    }

    /// Find a record by id, or by 1-based position when `reference` is a number.
    pub fn find(&self, kind: RecordKind, reference: &str) -> Option<&Record> {
        let records = self.collection(kind);
        records
            .iter()
            .find(|r| match r.id() {
                Some(Value::String(id)) => id == reference,
                Some(other) => other.to_string() == reference,
                None => false,
            })
            .or_else(|| {
                reference
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n >= 1)
                    .and_then(|n| records.get(n - 1))
            })
    }

    /// Add an imported record. A missing or already-used id is replaced by a
    /// fresh one so an import never overwrites a local record. Returns the
    /// id the record ended up with.
    pub fn import(&mut self, kind: RecordKind, mut record: Record) -> String {
        let collides = match record.id() {
            None => true,
            Some(id) => self.collection(kind).iter().any(|r| r.id() == Some(id)),
        };
        if collides {
            let mut fresh = make_id();
            while self.collection(kind).iter().any(|r| r.get_str("id") == Some(fresh.as_str())) {
                fresh = make_id();
            }
            record.set_id(fresh);
        }
        let id = match record.id() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        self.collection_mut(kind).push(record);
        if kind == RecordKind::Message {
            sort_messages(&mut self.messages);
        }
        id
    }

    pub fn collections(&self) -> Collections {
        Collections {
            items: self.items.clone(),
            notes: self.notes.clone(),
            messages: self.messages.clone(),
        }
    }

    /// Replace the replicated collections, keeping local credentials.
    pub fn apply_collections(&mut self, incoming: Collections) {
        self.items = incoming.items;
        self.notes = incoming.notes;
        self.messages = incoming.messages;
    }

    /// Bring notes written by older clients to the current shape:
    /// `text` becomes `body`, a single `link` becomes `links`.
    /// Returns true when anything changed.
    pub fn normalize_notes(&mut self) -> bool {
        let mut changed = false;
        for note in &mut self.notes {
            let fields = &mut note.0;
            let has_body = fields.get("body").and_then(Value::as_str).is_some_and(|b| !b.is_empty());
            if !has_body {
                if let Some(text) = fields.remove("text") {
                    fields.insert("body".into(), text);
                    changed = true;
                }
            }
            if !fields.get("links").is_some_and(Value::is_array) {
                if let Some(link) = fields.remove("link") {
                    let links = if link.is_null() { vec![] } else { vec![link] };
                    fields.insert("links".into(), Value::Array(links));
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Short random id: six base-36 characters.
pub fn make_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

fn message_timestamp(record: &Record) -> Option<NaiveDateTime> {
    let joined = format!("{} {}", record.get_str("date")?, record.get_str("time")?);
    NaiveDateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Newest first; undated messages sink to the end in their original order.
pub fn sort_messages(messages: &mut [Record]) {
    messages.sort_by(|a, b| match (message_timestamp(a), message_timestamp(b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn import_keeps_free_id_and_replaces_taken_one() {
        let mut state = AppState::default();
        state.items.push(rec(json!({"id": "abc123", "text": "local"})));

        let kept = state.import(RecordKind::Item, rec(json!({"id": "zzz999", "text": "a"})));
        assert_eq!(kept, "zzz999");

        let renamed = state.import(RecordKind::Item, rec(json!({"id": "abc123", "text": "b"})));
        assert_ne!(renamed, "abc123");
        assert_eq!(renamed.len(), 6);
        assert_eq!(state.items[0].get_str("text"), Some("local"));
        assert_eq!(state.items.len(), 3);

        let missing = state.import(RecordKind::Note, rec(json!({"title": "no id"})));
        assert_eq!(state.notes[0].get_str("id"), Some(missing.as_str()));
    }

    #[test]
    fn imported_messages_stay_newest_first() {
        let mut state = AppState::default();
        state.import(RecordKind::Message, rec(json!({"id": "m1", "date": "2024-01-01", "time": "09:00"})));
        state.import(RecordKind::Message, rec(json!({"id": "m2", "date": "2024-03-01", "time": "08:00"})));
        state.import(RecordKind::Message, rec(json!({"id": "m3"})));
        state.import(RecordKind::Message, rec(json!({"id": "m4", "date": "2024-03-01", "time": "10:30"})));
        let order: Vec<_> = state.messages.iter().filter_map(|m| m.get_str("id")).collect();
        assert_eq!(order, vec!["m4", "m2", "m1", "m3"]);
    }

    #[test]
    fn find_by_id_or_position() {
        let mut state = AppState::default();
        state.notes.push(rec(json!({"id": "n1"})));
        state.notes.push(rec(json!({"id": "n2"})));
        assert_eq!(state.find(RecordKind::Note, "n2").and_then(|r| r.get_str("id")), Some("n2"));
        assert_eq!(state.find(RecordKind::Note, "1").and_then(|r| r.get_str("id")), Some("n1"));
        assert!(state.find(RecordKind::Note, "0").is_none());
        assert!(state.find(RecordKind::Note, "nope").is_none());
    }

    #[test]
    fn old_notes_are_normalized() {
        let mut state = AppState::default();
        state.notes.push(rec(json!({"id": "n1", "text": "old body", "link": "https://x"})));
        state.notes.push(rec(json!({"id": "n2", "body": "new", "links": []})));
        assert!(state.normalize_notes());
        assert_eq!(state.notes[0].get_str("body"), Some("old body"));
        assert_eq!(state.notes[0].0["links"], json!(["https://x"]));
        assert!(state.notes[0].0.get("text").is_none());
        assert!(!state.normalize_notes());
    }

    #[test]
    fn transient_fields_are_dropped() {
        let r = rec(json!({"id": "a", "_cursor": 3, "text": "t"}));
        assert_eq!(r.without_transient(), rec(json!({"id": "a", "text": "t"})));
    }

    #[test]
    fn state_defaults_missing_collections() {
        let state: AppState = serde_json::from_value(json!({"items": [], "notes": []})).unwrap();
        assert!(state.messages.is_empty() && state.passwords.is_empty());
        assert!(serde_json::from_value::<AppState>(json!({"items": []})).is_err());
    }
}
