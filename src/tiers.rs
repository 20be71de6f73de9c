//! License types and the entitlements each one grants.
//!
//! The set of types is closed. Each type fixes three quotas and an ordered
//! list of capability tokens; both are copied onto a license when it is
//! created and never recomputed afterwards.
//!
//! | Type         | Users     | Workflows | Executions |
//! |--------------|-----------|-----------|------------|
//! | basic        | 3         | 5         | 1000       |
//! | professional | 10        | 50        | 10000      |
//! | enterprise   | unlimited | unlimited | unlimited  |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::LicenseError;

/// Quota value meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// Whether a stored quota is the unlimited sentinel.
pub fn is_unlimited(limit: i64) -> bool {
    limit == UNLIMITED
}

/// Render a quota for operators ("unlimited" for the sentinel).
pub fn format_limit(limit: i64) -> String {
    if is_unlimited(limit) {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}

const BASIC_FEATURES: &[&str] = &[
    "workflows:5",
    "users:3",
    "executions:1000",
    "apps:basic",
    "support:community",
];

const PROFESSIONAL_FEATURES: &[&str] = &[
    "workflows:50",
    "users:10",
    "executions:10000",
    "apps:all",
    "support:email",
    "integrations:advanced",
    "reporting:basic",
];

const ENTERPRISE_FEATURES: &[&str] = &[
    "workflows:unlimited",
    "users:unlimited",
    "executions:unlimited",
    "apps:all",
    "support:priority",
    "integrations:all",
    "reporting:advanced",
    "sso:enabled",
    "audit:enabled",
    "custom_branding:enabled",
];

/// The closed set of license types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseType {
    Basic,
    Professional,
    Enterprise,
}

/// Per-resource maximums granted by a license type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quotas {
    pub max_users: i64,
    pub max_workflows: i64,
    pub max_executions: i64,
}

impl LicenseType {
    pub const ALL: [LicenseType; 3] = [
        LicenseType::Basic,
        LicenseType::Professional,
        LicenseType::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseType::Basic => "basic",
            LicenseType::Professional => "professional",
            LicenseType::Enterprise => "enterprise",
        }
    }

    pub fn quotas(&self) -> Quotas {
        match self {
            LicenseType::Basic => Quotas {
                max_users: 3,
                max_workflows: 5,
                max_executions: 1000,
            },
            LicenseType::Professional => Quotas {
                max_users: 10,
                max_workflows: 50,
                max_executions: 10000,
            },
            LicenseType::Enterprise => Quotas {
                max_users: UNLIMITED,
                max_workflows: UNLIMITED,
                max_executions: UNLIMITED,
            },
        }
    }

    /// Capability tokens granted by this type, in table order.
    pub fn features(&self) -> Vec<String> {
        let table = match self {
            LicenseType::Basic => BASIC_FEATURES,
            LicenseType::Professional => PROFESSIONAL_FEATURES,
            LicenseType::Enterprise => ENTERPRISE_FEATURES,
        };
        table.iter().map(|f| f.to_string()).collect()
    }

    /// One-line summary used in operator help output.
    pub fn summary(&self) -> &'static str {
        match self {
            LicenseType::Basic => "Up to 3 users, 5 workflows, 1000 executions/month",
            LicenseType::Professional => "Up to 10 users, 50 workflows, 10000 executions/month",
            LicenseType::Enterprise => "Unlimited users, workflows, and executions",
        }
    }
}

impl fmt::Display for LicenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseType {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(LicenseType::Basic),
            "professional" => Ok(LicenseType::Professional),
            "enterprise" => Ok(LicenseType::Enterprise),
            other => Err(LicenseError::UnknownLicenseType(other.to_string())),
        }
    }
}

/// Resources that carry a quota on a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Users,
    Workflows,
    Executions,
}

impl ResourceKind {
    /// Resources with a live counter consulted by limit checks.
    pub const COUNTED: [ResourceKind; 2] = [ResourceKind::Users, ResourceKind::Workflows];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Users => "users",
            ResourceKind::Workflows => "workflows",
            ResourceKind::Executions => "executions",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(ResourceKind::Users),
            "workflows" => Ok(ResourceKind::Workflows),
            "executions" => Ok(ResourceKind::Executions),
            other => Err(LicenseError::UnknownResource(other.to_string())),
        }
    }
}
