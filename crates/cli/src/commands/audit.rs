use skillpath_core::audit::AuditLogEntry;
use skillpath_core::domain::request::RequestNumber;
use skillpath_db::repositories::{AuditLogRepository, SqlAuditLogRepository, SqlRequestRepository};

use crate::commands::{with_database, CommandResult};

/// Lists the audit trail of one entity (request, approval, session or
/// enrollment id), or every entry written under a correlation id. A request
/// number such as `TR-2026-00001` is resolved to its request id first.
pub fn run(id: &str, by_correlation: bool) -> CommandResult {
    let id = id.trim();
    if id.is_empty() {
        return CommandResult::failure("audit", "validation", "an id is required", 2);
    }

    let owned_id = id.to_string();
    let entries = with_database("audit", |pool, _config| async move {
        let entity_id = if by_correlation {
            owned_id.clone()
        } else {
            SqlRequestRepository::new(pool.clone())
                .find_id_by_number(&RequestNumber(owned_id.clone()))
                .await
                .map_err(|error| ("audit_query", error.to_string(), 5u8))?
                .map(|request_id| request_id.0)
                .unwrap_or_else(|| owned_id.clone())
        };

        let repository = SqlAuditLogRepository::new(pool);
        let listed = if by_correlation {
            repository.list_for_correlation(&entity_id).await
        } else {
            repository.list_for_entity(&entity_id).await
        };
        listed.map_err(|error| ("audit_query", error.to_string(), 5u8))
    });

    match entries {
        Ok(entries) => {
            let message = summarize(id, by_correlation, &entries);
            match serde_json::to_value(&entries) {
                Ok(data) => CommandResult::success_with_data("audit", message, Some(data)),
                Err(error) => CommandResult::failure("audit", "serialization", error.to_string(), 6),
            }
        }
        Err(result) => result,
    }
}

fn summarize(id: &str, by_correlation: bool, entries: &[AuditLogEntry]) -> String {
    let scope = if by_correlation { "correlation" } else { "entity" };
    let mut lines = vec![format!("{} audit entr(ies) for {scope} `{id}`", entries.len())];
    for entry in entries {
        lines.push(format!(
            "  {} {} {}.{}: {} -> {} by {}{}",
            entry.occurred_at.to_rfc3339(),
            entry.entity.as_str(),
            entry.entity_id,
            entry.field,
            entry.old_value.as_deref().unwrap_or("-"),
            entry.new_value.as_deref().unwrap_or("-"),
            entry.actor,
            entry.reason.as_deref().map(|reason| format!(" ({reason})")).unwrap_or_default(),
        ));
    }
    lines.join("\n")
}
