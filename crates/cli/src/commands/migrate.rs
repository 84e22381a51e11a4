use skillpath_db::migrations;

use crate::commands::{with_database, CommandResult};

pub fn run() -> CommandResult {
    let applied = with_database("migrate", |pool, _config| async move {
        let pending = migrations::pending_versions(&pool)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        Ok(pending)
    });

    match applied {
        Ok(pending) if pending.is_empty() => {
            CommandResult::success("migrate", "schema already up to date")
        }
        Ok(pending) => CommandResult::success(
            "migrate",
            format!("applied {} pending migration(s): {pending:?}", pending.len()),
        ),
        Err(result) => result,
    }
}
