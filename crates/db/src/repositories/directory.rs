use async_trait::async_trait;
use chrono::Utc;

use skillpath_core::directory::{DirectoryError, DirectoryLookup};
use skillpath_core::domain::user::{EntityId, UserId};

use super::{timestamp, RepositoryError};
use crate::DbPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmployeeRole {
    Employee,
    Hrbp,
    LearningAndDevelopment,
    Chro,
}

impl EmployeeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Hrbp => "hrbp",
            Self::LearningAndDevelopment => "learning_and_development",
            Self::Chro => "chro",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmployeeRecord {
    pub id: UserId,
    pub display_name: String,
    pub manager: Option<UserId>,
    pub entity: Option<EntityId>,
    pub role: EmployeeRole,
    pub active: bool,
}

impl EmployeeRecord {
    pub fn new(id: &str, role: EmployeeRole) -> Self {
        Self {
            id: UserId::new(id),
            display_name: id.to_owned(),
            manager: None,
            entity: None,
            role,
            active: true,
        }
    }

    pub fn reporting_to(mut self, manager: &str) -> Self {
        self.manager = Some(UserId::new(manager));
        self
    }

    pub fn in_entity(mut self, entity: &str) -> Self {
        self.entity = Some(EntityId(entity.to_owned()));
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Organisation directory backed by the `employee` table. Only active employees
/// are offered as approvers; ties resolve to the lowest id.
#[derive(Clone)]
pub struct SqlDirectory {
    pool: DbPool,
}

impl SqlDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_employee(&self, employee: &EmployeeRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO employee (id, display_name, manager_id, entity_id, role, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 manager_id = excluded.manager_id,
                 entity_id = excluded.entity_id,
                 role = excluded.role,
                 active = excluded.active",
        )
        .bind(&employee.id.0)
        .bind(&employee.display_name)
        .bind(employee.manager.as_ref().map(|manager| manager.0.as_str()))
        .bind(employee.entity.as_ref().map(|entity| entity.0.as_str()))
        .bind(employee.role.as_str())
        .bind(employee.active)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn first_active(
        &self,
        role: EmployeeRole,
        entity: Option<&EntityId>,
    ) -> Result<Option<UserId>, DirectoryError> {
        let id: Option<String> = match entity {
            Some(entity) => sqlx::query_scalar(
                "SELECT id FROM employee
                 WHERE role = ? AND active = 1 AND entity_id = ?
                 ORDER BY id LIMIT 1",
            )
            .bind(role.as_str())
            .bind(&entity.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(lookup_failed)?,
            None => sqlx::query_scalar(
                "SELECT id FROM employee WHERE role = ? AND active = 1 ORDER BY id LIMIT 1",
            )
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(lookup_failed)?,
        };

        Ok(id.map(UserId))
    }

    async fn employee_column(
        &self,
        user: &UserId,
        column: &'static str,
    ) -> Result<Option<String>, DirectoryError> {
        let value: Option<Option<String>> =
            sqlx::query_scalar(&format!("SELECT {column} FROM employee WHERE id = ?"))
                .bind(&user.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(lookup_failed)?;

        Ok(value.flatten())
    }
}

fn lookup_failed(error: sqlx::Error) -> DirectoryError {
    DirectoryError(error.to_string())
}

#[async_trait]
impl DirectoryLookup for SqlDirectory {
    async fn manager_of(&self, user: &UserId) -> Result<Option<UserId>, DirectoryError> {
        Ok(self.employee_column(user, "manager_id").await?.map(UserId))
    }

    async fn entity_of(&self, user: &UserId) -> Result<Option<EntityId>, DirectoryError> {
        Ok(self.employee_column(user, "entity_id").await?.map(EntityId))
    }

    async fn hrbp_for_entity(&self, entity: &EntityId) -> Result<Option<UserId>, DirectoryError> {
        self.first_active(EmployeeRole::Hrbp, Some(entity)).await
    }

    async fn any_hrbp(&self) -> Result<Option<UserId>, DirectoryError> {
        self.first_active(EmployeeRole::Hrbp, None).await
    }

    async fn any_learning_and_development(&self) -> Result<Option<UserId>, DirectoryError> {
        self.first_active(EmployeeRole::LearningAndDevelopment, None).await
    }

    async fn any_chro(&self) -> Result<Option<UserId>, DirectoryError> {
        self.first_active(EmployeeRole::Chro, None).await
    }
}

#[cfg(test)]
mod tests {
    use skillpath_core::directory::DirectoryLookup;
    use skillpath_core::domain::user::{EntityId, UserId};

    use super::{EmployeeRecord, EmployeeRole, SqlDirectory};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn lookups_prefer_entity_scope_and_skip_inactive_staff() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let directory = SqlDirectory::new(pool);

        for employee in [
            EmployeeRecord::new("emp-1", EmployeeRole::Employee).reporting_to("mgr-1").in_entity("de"),
            EmployeeRecord::new("mgr-1", EmployeeRole::Employee).in_entity("de"),
            EmployeeRecord::new("hrbp-a", EmployeeRole::Hrbp).in_entity("de").inactive(),
            EmployeeRecord::new("hrbp-b", EmployeeRole::Hrbp).in_entity("fr"),
            EmployeeRecord::new("hrbp-c", EmployeeRole::Hrbp).in_entity("de"),
            EmployeeRecord::new("lnd-1", EmployeeRole::LearningAndDevelopment),
        ] {
            directory.upsert_employee(&employee).await.expect("upsert employee");
        }

        let employee = UserId::new("emp-1");
        assert_eq!(directory.manager_of(&employee).await.unwrap(), Some(UserId::new("mgr-1")));
        assert_eq!(directory.manager_of(&UserId::new("mgr-1")).await.unwrap(), None);
        assert_eq!(directory.entity_of(&employee).await.unwrap(), Some(EntityId("de".to_owned())));
        assert_eq!(
            directory.hrbp_for_entity(&EntityId("de".to_owned())).await.unwrap(),
            Some(UserId::new("hrbp-c"))
        );
        assert_eq!(directory.hrbp_for_entity(&EntityId("it".to_owned())).await.unwrap(), None);
        assert_eq!(directory.any_hrbp().await.unwrap(), Some(UserId::new("hrbp-b")));
        assert_eq!(
            directory.any_learning_and_development().await.unwrap(),
            Some(UserId::new("lnd-1"))
        );
        assert_eq!(directory.any_chro().await.unwrap(), None);
    }
}
