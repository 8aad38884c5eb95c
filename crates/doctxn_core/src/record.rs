//! Durable transaction records.

use crate::error::{TxnError, TxnResult};
use crate::operation::Operation;
use crate::plan::Plan;
use crate::types::{TxnId, TxnState};
use doctxn_store::{DocId, Document, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const STATE_FIELD: &str = "s";
pub(crate) const OPS_FIELD: &str = "o";
pub(crate) const INFO_FIELD: &str = "i";
pub(crate) const PLAN_FIELD: &str = "p";
pub(crate) const CREATED_FIELD: &str = "t";

/// A transaction as persisted in the transaction collection.
///
/// Records are never deleted, so the outcome of any transaction that was
/// ever persisted can be queried indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction id, also the record's document id.
    pub id: TxnId,
    /// Current lifecycle state.
    pub state: TxnState,
    /// Operations in submission order.
    pub ops: Vec<Operation>,
    /// Opaque caller metadata.
    pub info: Option<Value>,
    /// Decided writes, present from `Applying` on.
    pub plan: Option<Plan>,
    /// Creation time in nanoseconds since the Unix epoch.
    pub created_ns: i64,
}

impl TransactionRecord {
    /// Creates a record in the `Preparing` state.
    #[must_use]
    pub fn new(id: TxnId, ops: Vec<Operation>, info: Option<Value>) -> Self {
        let created_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            id,
            state: TxnState::Preparing,
            ops,
            info,
            plan: None,
            created_ns,
        }
    }

    /// Returns the touched documents in visiting order, without duplicates.
    #[must_use]
    pub fn documents(&self) -> Vec<(String, DocId)> {
        self.ops
            .iter()
            .map(Operation::key)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Encodes the record as a document.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Codec`] if a payload cannot be encoded.
    pub fn to_document(&self) -> TxnResult<Document> {
        let mut doc = Document::new(self.id.doc_id())
            .field(STATE_FIELD, self.state.code())
            .field(OPS_FIELD, encode(&self.ops)?)
            .field(INFO_FIELD, self.info.clone().unwrap_or(Value::Null))
            .field(CREATED_FIELD, self.created_ns);
        if let Some(plan) = &self.plan {
            doc.set(PLAN_FIELD, encode(plan)?);
        }
        Ok(doc)
    }

    /// Decodes a record from its document.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Corrupted`] for missing or mistyped fields and
    /// [`TxnError::Codec`] for undecodable payloads.
    pub fn from_document(doc: &Document) -> TxnResult<Self> {
        let id = doc
            .id
            .as_text()
            .map(TxnId::from)
            .ok_or_else(|| TxnError::corrupted(format!("record id {} is not text", doc.id)))?;
        let code = doc
            .get_integer(STATE_FIELD)
            .ok_or_else(|| TxnError::corrupted(format!("record {id} has no state")))?;
        let state = TxnState::from_code(code)
            .ok_or_else(|| TxnError::corrupted(format!("record {id} has unknown state {code}")))?;
        let ops = decode(bytes_field(doc, OPS_FIELD, &id)?)?;
        let plan = match doc.get(PLAN_FIELD) {
            Some(_) => Some(decode(bytes_field(doc, PLAN_FIELD, &id)?)?),
            None => None,
        };
        let info = doc.get(INFO_FIELD).filter(|v| !v.is_null()).cloned();
        let created_ns = doc.get_integer(CREATED_FIELD).unwrap_or(0);
        Ok(Self {
            id,
            state,
            ops,
            info,
            plan,
            created_ns,
        })
    }
}

fn bytes_field<'a>(doc: &'a Document, field: &str, id: &TxnId) -> TxnResult<&'a [u8]> {
    doc.get(field)
        .and_then(Value::as_bytes)
        .ok_or_else(|| TxnError::corrupted(format!("record {id} has no {field:?} payload")))
}

pub(crate) fn encode<T: Serialize>(value: &T) -> TxnResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| TxnError::codec(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> TxnResult<T> {
    ciborium::from_reader(bytes).map_err(|e| TxnError::codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Effect, PlannedWrite};
    use doctxn_store::{Filter, Mutation};

    fn sample() -> TransactionRecord {
        TransactionRecord::new(
            TxnId::from("t1"),
            vec![
                Operation::new("accounts", 2)
                    .assert_matches(Filter::new().gte("balance", 100))
                    .change(Mutation::new().inc("balance", -100)),
                Operation::new("accounts", 1)
                    .assert_exists()
                    .change(Mutation::new().inc("balance", 100)),
                Operation::new("accounts", 2).assert_exists(),
            ],
            Some(Value::from("note")),
        )
    }

    #[test]
    fn record_survives_document_encoding() {
        let mut record = sample();
        record.state = TxnState::Applying;
        record.plan = Some(Plan {
            writes: vec![PlannedWrite {
                collection: "accounts".into(),
                id: DocId::from(1),
                observed_rev: Some("r".into()),
                previous_fields: vec!["balance".into()],
                effect: Effect::Remove,
            }],
        });
        let decoded = TransactionRecord::from_document(&record.to_document().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn new_record_is_preparing_without_plan() {
        let doc = sample().to_document().unwrap();
        assert_eq!(doc.get_integer(STATE_FIELD), Some(1));
        assert!(doc.get(PLAN_FIELD).is_none());
        assert!(doc.get_integer(CREATED_FIELD).unwrap() > 0);
    }

    #[test]
    fn documents_are_sorted_and_unique() {
        let docs = sample().documents();
        assert_eq!(
            docs,
            vec![
                ("accounts".to_string(), DocId::from(1)),
                ("accounts".to_string(), DocId::from(2)),
            ]
        );
    }

    #[test]
    fn malformed_records_are_rejected() {
        let no_state = Document::new("t1");
        assert!(matches!(
            TransactionRecord::from_document(&no_state),
            Err(TxnError::Corrupted { .. })
        ));

        let garbage = Document::new("t1")
            .field(STATE_FIELD, 2)
            .field(OPS_FIELD, vec![0xffu8, 0x00]);
        assert!(matches!(
            TransactionRecord::from_document(&garbage),
            Err(TxnError::Codec { .. })
        ));

        let unknown = Document::new("t1").field(STATE_FIELD, 42);
        assert!(TransactionRecord::from_document(&unknown).is_err());
    }
}
