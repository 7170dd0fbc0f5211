//! Authorisation seam.
//!
//! Permission evaluation belongs to the hosting application. The engine only consumes a yes/no
//! answer, and background tasks carry the [`SessionIdentity`] they were started with instead of
//! reading any ambient state.

use crate::entity::Entity;
use seqvault_types::{NonEmptyText, TextError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the interactive session that started an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user: NonEmptyText,
}

impl SessionIdentity {
    /// # Errors
    ///
    /// Returns `TextError::Empty` if `user` is blank.
    pub fn new(user: impl AsRef<str>) -> Result<Self, TextError> {
        Ok(Self {
            user: NonEmptyText::new(user)?,
        })
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

pub trait Authorizer: Send + Sync {
    fn has_permission(&self, identity: &SessionIdentity, entity: &Entity, action: Action) -> bool;
}

/// Grants everything. Used by the operator CLI and single-user deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn has_permission(&self, _identity: &SessionIdentity, _entity: &Entity, _action: Action) -> bool {
        true
    }
}
