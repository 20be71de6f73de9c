//! License lifecycle: creation, activation with hardware binding, validation
//! and operator revocation.
//!
//! ```text
//! active --(now > expires_at, seen by validate/activate)--> expired
//! active --(operator revoke)-------------------------------> revoked
//! ```
//!
//! `expired` and `revoked` are terminal. Expiry is detected lazily: the first
//! validation or activation past `expires_at` persists the flip and still
//! reports [`LicenseError::Expired`]; later calls report
//! [`LicenseError::NotActive`].

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::errors::{LicenseError, LicenseResult};
use crate::license::{License, LicenseStatus};
use crate::license_key::{generate_unique_license_key, mask_key};
use crate::store::{ActiveUpdate, BindOutcome, LicenseStore};
use crate::tiers::LicenseType;

/// Attempts at drawing a key that is not already stored.
const KEY_RETRIES: u32 = 5;

#[derive(Clone)]
pub struct LicenseEngine {
    store: Arc<dyn LicenseStore>,
    clock: Arc<dyn Clock>,
}

impl LicenseEngine {
    pub fn new(store: Arc<dyn LicenseStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn with_system_clock(store: Arc<dyn LicenseStore>) -> Self {
        Self::new(store, Arc::new(SystemClock))
    }

    pub fn store(&self) -> &Arc<dyn LicenseStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Issue and persist a new active license.
    ///
    /// The type is checked before anything else, so an unknown type never
    /// reaches the store. The returned license carries the plaintext key.
    pub async fn create(
        &self,
        license_type: &str,
        organization_id: &str,
        duration: Duration,
    ) -> LicenseResult<License> {
        let license_type = LicenseType::from_str(license_type)?;

        let store = self.store.clone();
        let key = generate_unique_license_key(
            move |candidate| {
                let store = store.clone();
                async move { Ok(store.get_by_key(&candidate).await?.is_some()) }
            },
            KEY_RETRIES,
        )
        .await?;

        let license = License::issue(
            Uuid::new_v4().to_string(),
            key,
            license_type,
            organization_id,
            self.clock.now(),
            duration,
        )?;
        self.store.put(&license).await?;

        info!(
            "Created {} license {} ({}) for organization '{}', expires {}",
            license.license_type,
            license.id,
            mask_key(&license.key),
            license.organization_id,
            license.expires_at
        );
        Ok(license)
    }

    /// Bind a license to `hardware_id` and `organization_id`.
    ///
    /// Re-activating from the hardware it is already bound to succeeds and
    /// only refreshes `last_validated`.
    pub async fn activate(
        &self,
        key: &str,
        hardware_id: &str,
        organization_id: &str,
    ) -> LicenseResult<License> {
        let masked = mask_key(key);
        let Some(mut license) = self.store.get_by_key(key).await? else {
            warn!("Activation rejected: license {masked} not found");
            return Err(LicenseError::NotFound(masked));
        };

        if !license.is_active() {
            warn!(
                "Activation rejected: license {} is {}",
                license.id, license.status
            );
            return Err(LicenseError::NotActive(license.status));
        }

        let now = self.clock.now();
        if license.is_expired_at(now) {
            return Err(self.expire(&mut license).await?);
        }

        if license.is_bound() && license.hardware_id != hardware_id {
            warn!(
                "Activation rejected: license {} is bound to other hardware",
                license.id
            );
            return Err(LicenseError::HardwareMismatch);
        }

        match self
            .store
            .bind_hardware(&license.id, hardware_id, organization_id, now)
            .await?
        {
            BindOutcome::Bound(bound) => {
                info!(
                    "Activated license {} for organization '{}'",
                    bound.id, bound.organization_id
                );
                Ok(bound)
            }
            BindOutcome::Mismatch => {
                // Lost a race with a concurrent activation.
                warn!(
                    "Activation rejected: license {} was bound concurrently",
                    license.id
                );
                Err(LicenseError::HardwareMismatch)
            }
            BindOutcome::Inactive(status) => {
                warn!(
                    "Activation rejected: license {} became {status} concurrently",
                    license.id
                );
                Err(LicenseError::NotActive(status))
            }
            BindOutcome::Missing => Err(LicenseError::NotFound(masked)),
        }
    }

    /// Revalidate a license resolved upstream.
    ///
    /// On success `last_validated` is refreshed and persisted. On expiry the
    /// status flip is persisted before [`LicenseError::Expired`] is returned.
    ///
    /// Only those two fields are written, and only while the stored license
    /// is still active, so a stale copy never undoes a concurrent binding or
    /// revocation. The passed license is refreshed from the store in place.
    pub async fn validate(&self, license: Option<&mut License>) -> LicenseResult<()> {
        let Some(license) = license else {
            return Err(LicenseError::NilLicense);
        };

        if !license.is_active() {
            debug!("License {} is {}", license.id, license.status);
            return Err(LicenseError::NotActive(license.status));
        }

        let now = self.clock.now();
        if license.is_expired_at(now) {
            return Err(self.expire(license).await?);
        }

        match self.store.touch_validated(&license.id, now).await? {
            ActiveUpdate::Updated(stored) => {
                *license = stored;
                debug!("Validated license {}", license.id);
                Ok(())
            }
            ActiveUpdate::Inactive(status) => {
                debug!("License {} became {status} before validation", license.id);
                license.status = status;
                Err(LicenseError::NotActive(status))
            }
            ActiveUpdate::Missing => Err(LicenseError::NotFound(license.id.clone())),
        }
    }

    /// Look up a license by key and validate it.
    pub async fn validate_key(&self, key: &str) -> LicenseResult<License> {
        let mut license = self
            .store
            .get_by_key(key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(mask_key(key)))?;

        self.validate(Some(&mut license)).await?;
        Ok(license)
    }

    /// Operator revocation. Only an active license can be revoked.
    pub async fn revoke(&self, key: &str) -> LicenseResult<License> {
        let license = self
            .store
            .get_by_key(key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(mask_key(key)))?;

        match self
            .store
            .deactivate(&license.id, LicenseStatus::Revoked)
            .await?
        {
            ActiveUpdate::Updated(revoked) => {
                warn!("Revoked license {} ({})", revoked.id, mask_key(&revoked.key));
                Ok(revoked)
            }
            ActiveUpdate::Inactive(status) => Err(LicenseError::NotActive(status)),
            ActiveUpdate::Missing => Err(LicenseError::NotFound(mask_key(key))),
        }
    }

    /// The most recently created active license of an organization.
    pub async fn get_organization_license(&self, organization_id: &str) -> LicenseResult<License> {
        match self.store.get_active_for_organization(organization_id).await? {
            Some(license) => Ok(license),
            None => {
                debug!("No active license for organization '{organization_id}'");
                Err(LicenseError::NotFound(format!(
                    "no active license for organization '{organization_id}'"
                )))
            }
        }
    }

    pub async fn list(&self) -> LicenseResult<Vec<License>> {
        self.store.list().await
    }

    /// Persist the `active -> expired` flip and build the error to surface.
    ///
    /// If the stored license already left `active` (revoked meanwhile), that
    /// status is kept and reported instead.
    async fn expire(&self, license: &mut License) -> LicenseResult<LicenseError> {
        match self
            .store
            .deactivate(&license.id, LicenseStatus::Expired)
            .await?
        {
            ActiveUpdate::Updated(stored) => {
                *license = stored;
                warn!(
                    "License {} expired at {}; status persisted",
                    license.id, license.expires_at
                );
                Ok(LicenseError::Expired(license.expires_at))
            }
            ActiveUpdate::Inactive(status) => {
                license.status = status;
                Ok(LicenseError::NotActive(status))
            }
            ActiveUpdate::Missing => Ok(LicenseError::NotFound(license.id.clone())),
        }
    }
}
