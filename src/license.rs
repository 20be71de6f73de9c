//! The license entity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LicenseError;
use crate::tiers::{LicenseType, ResourceKind};

/// Days before expiry at which a license counts as expiring soon.
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// A license duration of `days` whole days.
///
/// Fails with [`LicenseError::MalformedRequest`] when the value cannot be
/// represented; operator and HTTP input go through here.
pub fn duration_from_days(days: i64) -> Result<Duration, LicenseError> {
    Duration::try_days(days).ok_or_else(|| {
        LicenseError::MalformedRequest(format!("license duration of {days} days is out of range"))
    })
}

/// License status. Only `active -> expired` happens automatically;
/// `revoked` is set by an operator. Both `expired` and `revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Expired,
    Revoked,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Expired => "expired",
            LicenseStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LicenseStatus::Active),
            "expired" => Ok(LicenseStatus::Expired),
            "revoked" => Ok(LicenseStatus::Revoked),
            other => Err(LicenseError::StoreUnavailable(format!(
                "unrecognised license status '{other}'"
            ))),
        }
    }
}

/// A license record.
///
/// Serialized field names match the persisted document layout, so the JSON
/// written by the file store and the JSON returned over HTTP are the same.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub key: String,
    /// Empty until activation binds a tenant, unless set at creation.
    #[serde(default)]
    pub organization_id: String,
    #[serde(rename = "type")]
    pub license_type: LicenseType,
    pub status: LicenseStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    pub max_users: i64,
    pub max_workflows: i64,
    pub max_executions: i64,
    #[serde(default)]
    pub features: Vec<String>,
    /// Empty until the first successful activation.
    #[serde(default)]
    pub hardware_id: String,
    pub last_validated: DateTime<Utc>,
}

impl License {
    /// Build a fresh, active license of `license_type`.
    ///
    /// Quotas and features are copied from the type table here and never
    /// recomputed afterwards. An expiry past the representable date range is
    /// a [`LicenseError::MalformedRequest`].
    pub fn issue(
        id: String,
        key: String,
        license_type: LicenseType,
        organization_id: &str,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Self, LicenseError> {
        let expires_at = now.checked_add_signed(duration).ok_or_else(|| {
            LicenseError::MalformedRequest(format!(
                "license duration of {} days is out of range",
                duration.num_days()
            ))
        })?;

        let quotas = license_type.quotas();
        Ok(Self {
            id,
            key,
            organization_id: organization_id.to_string(),
            license_type,
            status: LicenseStatus::Active,
            created_at: now,
            expires_at,
            activated_at: None,
            max_users: quotas.max_users,
            max_workflows: quotas.max_workflows,
            max_executions: quotas.max_executions,
            features: license_type.features(),
            hardware_id: String::new(),
            last_validated: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == LicenseStatus::Active
    }

    /// Strictly past the expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_bound(&self) -> bool {
        !self.hardware_id.is_empty()
    }

    /// Whether any stored feature token starts with `token`.
    ///
    /// `"workflows"` matches `"workflows:5"`.
    pub fn has_feature(&self, token: &str) -> bool {
        self.features.iter().any(|f| f.starts_with(token))
    }

    /// The stored quota for `resource`.
    pub fn limit(&self, resource: ResourceKind) -> i64 {
        match resource {
            ResourceKind::Users => self.max_users,
            ResourceKind::Workflows => self.max_workflows,
            ResourceKind::Executions => self.max_executions,
        }
    }

    /// Whole days until expiry, negative once expired.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }

    /// Within the warning window but not yet expired.
    pub fn expiring_soon(&self, now: DateTime<Utc>) -> bool {
        let left = self.expires_at - now;
        left > Duration::zero() && left <= Duration::days(EXPIRY_WARNING_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ty: LicenseType) -> License {
        License::issue(
            "id-1".into(),
            "ABCD1234-EFAB5678-0000FFFF-12345678".into(),
            ty,
            "org-1",
            Utc::now(),
            Duration::days(30),
        )
        .unwrap()
    }

    #[test]
    fn issue_copies_type_table() {
        let license = sample(LicenseType::Professional);
        assert_eq!(license.status, LicenseStatus::Active);
        assert_eq!(license.max_users, 10);
        assert_eq!(license.max_workflows, 50);
        assert_eq!(license.max_executions, 10000);
        assert_eq!(license.features, LicenseType::Professional.features());
        assert_eq!(license.expires_at - license.created_at, Duration::days(30));
        assert!(license.activated_at.is_none());
        assert!(!license.is_bound());
    }

    #[test]
    fn issue_rejects_expiry_beyond_date_range() {
        let err = License::issue(
            "id-1".into(),
            "ABCD1234-EFAB5678-0000FFFF-12345678".into(),
            LicenseType::Basic,
            "org-1",
            Utc::now(),
            Duration::days(100_000_000),
        )
        .unwrap_err();
        assert!(matches!(err, LicenseError::MalformedRequest(_)));
    }

    #[test]
    fn duration_from_days_bounds() {
        assert_eq!(duration_from_days(30).unwrap(), Duration::days(30));
        assert!(matches!(
            duration_from_days(i64::MAX),
            Err(LicenseError::MalformedRequest(_))
        ));
    }

    #[test]
    fn feature_match_is_prefix_based() {
        let license = sample(LicenseType::Basic);
        assert!(license.has_feature("workflows"));
        assert!(license.has_feature("workflows:5"));
        assert!(!license.has_feature("workflows:50"));
        assert!(!license.has_feature("sso"));
    }

    #[test]
    fn expiry_is_strict() {
        let license = sample(LicenseType::Basic);
        assert!(!license.is_expired_at(license.expires_at));
        assert!(license.is_expired_at(license.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn expiring_soon_window() {
        let license = sample(LicenseType::Basic);
        assert!(license.expiring_soon(license.created_at));
        assert!(!license.expiring_soon(license.expires_at + Duration::days(1)));
        assert_eq!(license.days_remaining(license.created_at), 30);
    }

    #[test]
    fn document_layout_uses_snake_case_fields() {
        let license = sample(LicenseType::Enterprise);
        let json = serde_json::to_value(&license).unwrap();

        assert_eq!(json["type"], "enterprise");
        assert_eq!(json["status"], "active");
        assert_eq!(json["organization_id"], "org-1");
        assert_eq!(json["max_users"], -1);
        assert_eq!(json["hardware_id"], "");
        assert!(json.get("activated_at").is_none());

        let back: License = serde_json::from_value(json).unwrap();
        assert_eq!(back, license);
    }
}
