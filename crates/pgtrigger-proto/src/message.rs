//! Change messages and the notification payload codec.
//!
//! A notification payload is the JSON object built by the trigger function:
//!
//! ```text
//! {"schema":"public","table":"users","action":"UPDATE",
//!  "old_data":"{\"id\":1,\"name\":\"a\"}","new_data":"{\"id\":1,\"name\":\"b\"}"}
//! ```
//!
//! `old_data` and `new_data` carry `row_to_json` output as a nested JSON
//! string. An empty string means the action has no such image.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

/// Row-level operation that produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl Action {
    /// The trigger operation name (`TG_OP`) for this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        }
    }

    /// Whether notifications for this action carry the row before the change.
    pub fn has_before_image(&self) -> bool {
        matches!(self, Action::Update | Action::Delete)
    }

    /// Whether notifications for this action carry the row after the change.
    pub fn has_after_image(&self) -> bool {
        matches!(self, Action::Insert | Action::Update)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Action::Insert),
            "UPDATE" => Ok(Action::Update),
            "DELETE" => Ok(Action::Delete),
            other => Err(DecodeError::UnknownAction(other.to_string())),
        }
    }
}

/// A decoded row change.
///
/// Fields are read-only once decoded. The before image is only present for
/// `UPDATE` and `DELETE`, the after image only for `INSERT` and `UPDATE`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeMessage {
    schema: String,
    table: String,
    action: Action,
    before: Option<Value>,
    after: Option<Value>,
}

impl ChangeMessage {
    /// Create an insert message.
    pub fn insert(schema: impl Into<String>, table: impl Into<String>, after: Value) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            action: Action::Insert,
            before: None,
            after: Some(after),
        }
    }

    /// Create an update message.
    pub fn update(
        schema: impl Into<String>,
        table: impl Into<String>,
        before: Value,
        after: Value,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            action: Action::Update,
            before: Some(before),
            after: Some(after),
        }
    }

    /// Create a delete message.
    pub fn delete(schema: impl Into<String>, table: impl Into<String>, before: Value) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            action: Action::Delete,
            before: Some(before),
            after: None,
        }
    }

    /// Schema of the changed table.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Name of the changed table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The operation that produced this change.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Row contents before the change.
    pub fn before(&self) -> Option<&Value> {
        self.before.as_ref()
    }

    /// Row contents after the change.
    pub fn after(&self) -> Option<&Value> {
        self.after.as_ref()
    }

    /// Deserialize the before image into a row type.
    ///
    /// Returns `Ok(None)` when the message has no before image.
    pub fn before_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.before.as_ref().map(|v| T::deserialize(v)).transpose()
    }

    /// Deserialize the after image into a row type.
    ///
    /// Returns `Ok(None)` when the message has no after image.
    pub fn after_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.after.as_ref().map(|v| T::deserialize(v)).transpose()
    }

    /// Encode this message in the notification payload format.
    pub fn to_payload(&self) -> String {
        let wire = WirePayload {
            schema: self.schema.clone(),
            table: self.table.clone(),
            action: self.action.as_str().to_string(),
            old_data: encode_image(self.before.as_ref()),
            new_data: encode_image(self.after.as_ref()),
        };
        // A struct of strings always serializes.
        serde_json::to_string(&wire).unwrap_or_default()
    }
}

/// Payload shape produced by the trigger function.
#[derive(Debug, Serialize, Deserialize)]
struct WirePayload {
    schema: String,
    table: String,
    action: String,
    old_data: String,
    new_data: String,
}

fn encode_image(image: Option<&Value>) -> String {
    image.map(Value::to_string).unwrap_or_default()
}

fn decode_image(field: &'static str, raw: &str) -> Result<Option<Value>, DecodeError> {
    if raw.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| DecodeError::InvalidImage {
            field,
            message: e.to_string(),
        })
}

/// Reject an image on an action that never carries one. An empty image is
/// always accepted.
fn check_image(
    field: &'static str,
    action: Action,
    allowed: bool,
    image: &Option<Value>,
) -> Result<(), DecodeError> {
    if !allowed && image.is_some() {
        return Err(DecodeError::UnexpectedImage {
            field,
            action: action.as_str(),
        });
    }
    Ok(())
}

/// Decode a raw notification payload into a [`ChangeMessage`].
///
/// Decoding is pure. An empty `old_data` or `new_data` means the image is
/// absent. A payload that is not the trigger's shape, an unknown action,
/// malformed row JSON or an image on an action that never carries one
/// yields a [`DecodeError`].
pub fn decode(raw: &[u8]) -> Result<ChangeMessage, DecodeError> {
    let wire: WirePayload =
        serde_json::from_slice(raw).map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

    let action: Action = wire.action.parse()?;
    let before = decode_image("old_data", &wire.old_data)?;
    let after = decode_image("new_data", &wire.new_data)?;

    check_image("old_data", action, action.has_before_image(), &before)?;
    check_image("new_data", action, action.has_after_image(), &after)?;

    Ok(ChangeMessage {
        schema: wire.schema,
        table: wire.table,
        action,
        before,
        after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(action: &str, old_data: &str, new_data: &str) -> Vec<u8> {
        json!({
            "schema": "public",
            "table": "alarm_item",
            "action": action,
            "old_data": old_data,
            "new_data": new_data,
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_decode_insert() {
        let msg = decode(&payload("INSERT", "", r#"{"id":1}"#)).unwrap();

        assert_eq!(msg.schema(), "public");
        assert_eq!(msg.table(), "alarm_item");
        assert_eq!(msg.action(), Action::Insert);
        assert_eq!(msg.after(), Some(&json!({"id": 1})));
        assert!(msg.before().is_none());
    }

    #[test]
    fn test_decode_delete() {
        let msg = decode(&payload("DELETE", r#"{"id":1}"#, "")).unwrap();

        assert_eq!(msg.action(), Action::Delete);
        assert_eq!(msg.before(), Some(&json!({"id": 1})));
        assert!(msg.after().is_none());
    }

    #[test]
    fn test_decode_update() {
        let msg = decode(&payload(
            "UPDATE",
            r#"{"id":1,"level":"low"}"#,
            r#"{"id":1,"level":"high"}"#,
        ))
        .unwrap();

        assert_eq!(msg.action(), Action::Update);
        assert_eq!(msg.before().unwrap()["level"], "low");
        assert_eq!(msg.after().unwrap()["level"], "high");
    }

    #[test]
    fn test_unknown_action() {
        let err = decode(&payload("TRUNCATE", "", "")).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownAction(ref a) if a == "TRUNCATE"));

        let err = decode(&payload("insert", "", r#"{"id":1}"#)).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownAction(_)));
    }

    #[test]
    fn test_malformed_image() {
        let err = decode(&payload("INSERT", "", "{id:1")).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidImage {
                field: "new_data",
                ..
            }
        ));

        let err = decode(&payload("DELETE", "not json", "")).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidImage {
                field: "old_data",
                ..
            }
        ));
    }

    #[test]
    fn test_image_must_match_action() {
        let err = decode(&payload("INSERT", r#"{"id":1}"#, r#"{"id":1}"#)).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedImage { field: "old_data", .. }));

        let err = decode(&payload("DELETE", r#"{"id":1}"#, r#"{"id":1}"#)).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedImage { field: "new_data", .. }));
    }

    #[test]
    fn test_empty_image_is_absent() {
        let msg = decode(&payload("UPDATE", "", r#"{"id":1}"#)).unwrap();
        assert_eq!(msg.action(), Action::Update);
        assert!(msg.before().is_none());
        assert_eq!(msg.after(), Some(&json!({"id": 1})));

        let msg = decode(&payload("DELETE", "", "")).unwrap();
        assert_eq!(msg.action(), Action::Delete);
        assert!(msg.before().is_none());
        assert!(msg.after().is_none());
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            decode(b"not json at all"),
            Err(DecodeError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode(br#"{"schema":"public","table":"t","action":"INSERT"}"#),
            Err(DecodeError::InvalidPayload(_))
        ));
        assert!(decode(b"").unwrap_err().is_decode_error());
    }

    #[test]
    fn test_typed_images() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct AlarmItem {
            id: i64,
            level: String,
        }

        let msg = ChangeMessage::update(
            "public",
            "alarm_item",
            json!({"id": 7, "level": "low"}),
            json!({"id": 7, "level": "high"}),
        );

        let before: Option<AlarmItem> = msg.before_as().unwrap();
        let after: Option<AlarmItem> = msg.after_as().unwrap();
        assert_eq!(before.unwrap().level, "low");
        assert_eq!(
            after,
            Some(AlarmItem {
                id: 7,
                level: "high".to_string()
            })
        );

        let insert = ChangeMessage::insert("public", "alarm_item", json!({"id": 1, "level": "x"}));
        assert!(insert.before_as::<AlarmItem>().unwrap().is_none());
    }

    #[test]
    fn test_payload_matches_trigger_format() {
        let msg = ChangeMessage::delete("public", "alarm_item", json!({"id": 3}));
        let wire: Value = serde_json::from_str(&msg.to_payload()).unwrap();

        assert_eq!(wire["action"], "DELETE");
        assert_eq!(wire["new_data"], "");
        assert_eq!(wire["old_data"], r#"{"id":3}"#);
        assert_eq!(decode(msg.to_payload().as_bytes()).unwrap(), msg);
    }
}
