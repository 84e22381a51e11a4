use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::user::{EntityId, UserId};
use crate::errors::WorkflowError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("directory lookup failed: {0}")]
pub struct DirectoryError(pub String);

impl From<DirectoryError> for WorkflowError {
    fn from(value: DirectoryError) -> Self {
        WorkflowError::transient(value.to_string())
    }
}

/// Organisation lookups. `Ok(None)` means "none found" and is a fallback trigger,
/// never a success.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    async fn manager_of(&self, user: &UserId) -> Result<Option<UserId>, DirectoryError>;
    async fn entity_of(&self, user: &UserId) -> Result<Option<EntityId>, DirectoryError>;
    async fn hrbp_for_entity(&self, entity: &EntityId) -> Result<Option<UserId>, DirectoryError>;
    async fn any_hrbp(&self) -> Result<Option<UserId>, DirectoryError>;
    async fn any_learning_and_development(&self) -> Result<Option<UserId>, DirectoryError>;
    async fn any_chro(&self) -> Result<Option<UserId>, DirectoryError>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    managers: HashMap<UserId, UserId>,
    entities: HashMap<UserId, EntityId>,
    hrbps: Vec<(UserId, Option<EntityId>)>,
    learning_and_development: Vec<UserId>,
    chros: Vec<UserId>,
}

impl InMemoryDirectory {
    pub fn with_employee(
        mut self,
        user: &str,
        manager: Option<&str>,
        entity: Option<&str>,
    ) -> Self {
        let user = UserId::new(user);
        if let Some(manager) = manager {
            self.managers.insert(user.clone(), UserId::new(manager));
        }
        if let Some(entity) = entity {
            self.entities.insert(user, EntityId(entity.to_owned()));
        }
        self
    }

    pub fn with_hrbp(mut self, user: &str, entity: Option<&str>) -> Self {
        self.hrbps.push((UserId::new(user), entity.map(|entity| EntityId(entity.to_owned()))));
        self
    }

    pub fn with_learning_and_development(mut self, user: &str) -> Self {
        self.learning_and_development.push(UserId::new(user));
        self
    }

    pub fn with_chro(mut self, user: &str) -> Self {
        self.chros.push(UserId::new(user));
        self
    }
}

#[async_trait]
impl DirectoryLookup for InMemoryDirectory {
    async fn manager_of(&self, user: &UserId) -> Result<Option<UserId>, DirectoryError> {
        Ok(self.managers.get(user).cloned())
    }

    async fn entity_of(&self, user: &UserId) -> Result<Option<EntityId>, DirectoryError> {
        Ok(self.entities.get(user).cloned())
    }

    async fn hrbp_for_entity(&self, entity: &EntityId) -> Result<Option<UserId>, DirectoryError> {
        Ok(self
            .hrbps
            .iter()
            .find(|(_, scope)| scope.as_ref() == Some(entity))
            .map(|(user, _)| user.clone()))
    }

    async fn any_hrbp(&self) -> Result<Option<UserId>, DirectoryError> {
        Ok(self.hrbps.iter().map(|(user, _)| user).min().cloned())
    }

    async fn any_learning_and_development(&self) -> Result<Option<UserId>, DirectoryError> {
        Ok(self.learning_and_development.iter().min().cloned())
    }

    async fn any_chro(&self) -> Result<Option<UserId>, DirectoryError> {
        Ok(self.chros.iter().min().cloned())
    }
}
