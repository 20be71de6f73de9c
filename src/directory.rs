//! Organization lookup and resource counts.
//!
//! The organization, user and workflow subsystems live outside this crate.
//! [`OrganizationDirectory`] is the seam the enforcement gate resolves callers
//! through; [`InMemoryDirectory`] backs both that seam and
//! [`ResourceCounter`] for tests and single-node deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Serialize;

use crate::entitlements::ResourceCounter;
use crate::errors::{LicenseError, LicenseResult};
use crate::tiers::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn get_organization(&self, organization_id: &str) -> LicenseResult<Organization>;
}

#[derive(Debug, Default)]
struct Entry {
    name: String,
    users: u64,
    workflows: u64,
}

/// Organizations and their usage counts held in memory.
///
/// With [`InMemoryDirectory::accepting_any`], unknown organizations resolve
/// to an empty entry instead of failing.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: RwLock<HashMap<String, Entry>>,
    accept_unknown: bool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepting_any() -> Self {
        Self {
            accept_unknown: true,
            ..Self::default()
        }
    }

    pub fn add_organization(&self, id: &str, name: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.entry(id.to_string()).or_default().name = name.to_string();
    }

    /// Set the live count of `resource`, registering the organization if new.
    pub fn set_count(&self, id: &str, resource: ResourceKind, count: u64) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let entry = entries.entry(id.to_string()).or_insert_with(|| Entry {
            name: id.to_string(),
            ..Entry::default()
        });
        match resource {
            ResourceKind::Users => entry.users = count,
            ResourceKind::Workflows => entry.workflows = count,
            // not tracked live
            ResourceKind::Executions => {}
        }
    }

    fn not_found(id: &str) -> LicenseError {
        LicenseError::NotFound(format!("organization '{id}'"))
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryDirectory {
    async fn get_organization(&self, organization_id: &str) -> LicenseResult<Organization> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        match entries.get(organization_id) {
            Some(entry) => Ok(Organization {
                id: organization_id.to_string(),
                name: entry.name.clone(),
            }),
            None if self.accept_unknown && !organization_id.is_empty() => Ok(Organization {
                id: organization_id.to_string(),
                name: organization_id.to_string(),
            }),
            None => Err(Self::not_found(organization_id)),
        }
    }
}

#[async_trait]
impl ResourceCounter for InMemoryDirectory {
    async fn count(&self, organization_id: &str, resource: ResourceKind) -> LicenseResult<u64> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let entry = match entries.get(organization_id) {
            Some(entry) => entry,
            None if self.accept_unknown => return Ok(0),
            None => return Err(Self::not_found(organization_id)),
        };

        match resource {
            ResourceKind::Users => Ok(entry.users),
            ResourceKind::Workflows => Ok(entry.workflows),
            ResourceKind::Executions => Err(LicenseError::UnknownResource(format!(
                "{resource} has no live counter"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_organizations_resolve() {
        let dir = InMemoryDirectory::new();
        dir.add_organization("org-1", "Acme");

        let org = dir.get_organization("org-1").await.unwrap();
        assert_eq!(org.name, "Acme");
        assert!(dir.get_organization("org-2").await.is_err());
    }

    #[tokio::test]
    async fn counts_track_users_and_workflows() {
        let dir = InMemoryDirectory::new();
        dir.set_count("org-1", ResourceKind::Users, 4);
        dir.set_count("org-1", ResourceKind::Workflows, 7);

        assert_eq!(dir.count("org-1", ResourceKind::Users).await.unwrap(), 4);
        assert_eq!(dir.count("org-1", ResourceKind::Workflows).await.unwrap(), 7);
        assert!(dir.count("org-1", ResourceKind::Executions).await.is_err());
        assert!(dir.count("org-2", ResourceKind::Users).await.is_err());
    }

    #[tokio::test]
    async fn accepting_any_resolves_unknown_with_zero_counts() {
        let dir = InMemoryDirectory::accepting_any();

        assert_eq!(dir.get_organization("org-9").await.unwrap().id, "org-9");
        assert_eq!(dir.count("org-9", ResourceKind::Users).await.unwrap(), 0);
        assert!(dir.get_organization("").await.is_err());
    }
}
