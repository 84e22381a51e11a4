use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::user::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    TrainingRequest,
    Approval,
    Session,
    Enrollment,
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrainingRequest => "training_request",
            Self::Approval => "approval",
            Self::Session => "session",
            Self::Enrollment => "enrollment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "training_request" => Some(Self::TrainingRequest),
            "approval" => Some(Self::Approval),
            "session" => Some(Self::Session),
            "enrollment" => Some(Self::Enrollment),
            _ => None,
        }
    }
}

/// Who is acting, under which correlation id, and the instant the operation runs at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub actor: UserId,
    pub correlation_id: String,
    pub at: DateTime<Utc>,
}

impl AuditContext {
    pub fn new(actor: UserId, correlation_id: impl Into<String>) -> Self {
        Self { actor, correlation_id: correlation_id.into(), at: Utc::now() }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Immutable record of one tracked field change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub entry_id: String,
    pub entity: AuditEntity,
    pub entity_id: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub actor: UserId,
    pub correlation_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn field_change(
        context: &AuditContext,
        entity: AuditEntity,
        entity_id: impl Into<String>,
        field: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            entity,
            entity_id: entity_id.into(),
            field: field.into(),
            old_value,
            new_value,
            reason: None,
            actor: context.actor.clone(),
            correlation_id: context.correlation_id.clone(),
            occurred_at: context.at,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Append-only. Callers record synchronously with the change an entry describes.
pub trait AuditRecorder: Send + Sync {
    fn record(&self, entry: AuditLogEntry);
}

/// Collects the entries of one operation so they are recorded only once the
/// operation can no longer fail.
#[derive(Debug)]
pub struct AuditBatch<'a> {
    context: &'a AuditContext,
    entries: Vec<AuditLogEntry>,
}

impl<'a> AuditBatch<'a> {
    pub fn new(context: &'a AuditContext) -> Self {
        Self { context, entries: Vec::new() }
    }

    pub fn change(
        &mut self,
        entity: AuditEntity,
        entity_id: &str,
        field: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> &mut Self {
        if old_value != new_value {
            self.entries.push(AuditLogEntry::field_change(
                self.context,
                entity,
                entity_id,
                field,
                old_value,
                new_value,
            ));
        }
        self
    }

    /// Same as [`Self::change`], but the entry is kept even when the value is unchanged.
    pub fn event(
        &mut self,
        entity: AuditEntity,
        entity_id: &str,
        field: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        reason: Option<&str>,
    ) -> &mut Self {
        let mut entry = AuditLogEntry::field_change(
            self.context,
            entity,
            entity_id,
            field,
            old_value,
            new_value,
        );
        entry.reason = reason.map(str::to_owned);
        self.entries.push(entry);
        self
    }

    pub fn with_reason(&mut self, reason: &str) -> &mut Self {
        for entry in &mut self.entries {
            if entry.reason.is_none() {
                entry.reason = Some(reason.to_owned());
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flush<R>(self, recorder: &R)
    where
        R: AuditRecorder + ?Sized,
    {
        for entry in self.entries {
            recorder.record(entry);
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditRecorder {
    entries: Arc<Mutex<Vec<AuditLogEntry>>>,
}

impl InMemoryAuditRecorder {
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn entries_for(&self, entity_id: &str) -> Vec<AuditLogEntry> {
        self.entries().into_iter().filter(|entry| entry.entity_id == entity_id).collect()
    }

    /// Hands the buffered entries to the caller, leaving the recorder empty.
    pub fn take(&self) -> Vec<AuditLogEntry> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl AuditRecorder for InMemoryAuditRecorder {
    fn record(&self, entry: AuditLogEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::audit::{AuditBatch, AuditContext, AuditEntity, InMemoryAuditRecorder};
    use crate::domain::user::UserId;

    fn context() -> AuditContext {
        AuditContext::new(UserId::new("hr-admin"), "req-123")
            .at(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap())
    }

    #[test]
    fn batch_records_only_real_changes() {
        let context = context();
        let recorder = InMemoryAuditRecorder::default();
        let mut batch = AuditBatch::new(&context);
        batch
            .change(
                AuditEntity::TrainingRequest,
                "r-1",
                "status",
                Some("pending".to_owned()),
                Some("approved".to_owned()),
            )
            .change(
                AuditEntity::TrainingRequest,
                "r-1",
                "current_approval_level",
                Some("3".to_owned()),
                Some("3".to_owned()),
            );
        batch.flush(&recorder);

        let entries = recorder.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field, "status");
        assert_eq!(entries[0].actor, UserId::new("hr-admin"));
        assert_eq!(entries[0].correlation_id, "req-123");
        assert_eq!(entries[0].occurred_at, context.at);
    }

    #[test]
    fn nothing_is_recorded_until_flush() {
        let context = context();
        let recorder = InMemoryAuditRecorder::default();
        {
            let mut batch = AuditBatch::new(&context);
            batch.change(
                AuditEntity::Enrollment,
                "e-1",
                "status",
                Some("confirmed".to_owned()),
                Some("cancelled".to_owned()),
            );
            assert_eq!(batch.len(), 1);
        }

        assert!(recorder.entries().is_empty());
    }

    #[test]
    fn reason_is_applied_to_entries_without_one() {
        let context = context();
        let recorder = InMemoryAuditRecorder::default();
        let mut batch = AuditBatch::new(&context);
        batch
            .event(AuditEntity::Enrollment, "e-1", "completion_status", None, None, Some("manual"))
            .change(
                AuditEntity::Enrollment,
                "e-1",
                "passed",
                None,
                Some("true".to_owned()),
            )
            .with_reason("late score sheet");
        batch.flush(&recorder);

        let reasons: Vec<_> =
            recorder.entries_for("e-1").into_iter().map(|entry| entry.reason).collect();
        assert_eq!(
            reasons,
            vec![Some("manual".to_owned()), Some("late score sheet".to_owned())]
        );
        assert_eq!(recorder.take().len(), 2);
        assert!(recorder.entries().is_empty());
    }
}
