//! Local flat-file license store.
//!
//! Each license lives in `<dir>/license_<id>.json`. There is no secondary
//! index: lookups by key or organization read every document, which is only
//! acceptable for small installations.
//!
//! Writes go to a temporary file that is renamed into place, and every
//! mutation runs under one in-process lock so that [`FileStore::bind_hardware`]
//! is a true compare-and-set against other writers in the same process.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::errors::{LicenseError, LicenseResult};
use crate::license::{License, LicenseStatus};
use crate::store::{ActiveUpdate, BindOutcome, LicenseStore};

const FILE_PREFIX: &str = "license_";
const FILE_SUFFIX: &str = ".json";

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl AsRef<Path>) -> LicenseResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            error!("Failed to create license directory {}: {e}", dir.display());
            e
        })?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Document path for `id`, or `None` if the id could escape the directory.
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return None;
        }
        Some(self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}")))
    }

    async fn read_document(path: &Path) -> LicenseResult<Option<License>> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                error!("Failed to read {}: {e}", path.display());
                return Err(e.into());
            }
        };

        let license = serde_json::from_slice(&data).map_err(|e| {
            error!("Corrupt license document {}: {e}", path.display());
            LicenseError::from(e)
        })?;
        Ok(Some(license))
    }

    /// Write without taking the lock; callers must hold `write_lock`.
    async fn write_document(&self, license: &License) -> LicenseResult<()> {
        let path = self.path_for(&license.id).ok_or_else(|| {
            LicenseError::MalformedRequest(format!(
                "license id '{}' is not a valid document name",
                license.id
            ))
        })?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(license).map_err(|e| {
            error!("Failed to encode license {}: {e}", license.id);
            LicenseError::from(e)
        })?;

        fs::write(&tmp, &data).await.map_err(|e| {
            error!("Failed to write {}: {e}", tmp.display());
            e
        })?;
        restrict_permissions(&tmp).await?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            error!("Failed to move {} into place: {e}", path.display());
            e
        })?;

        debug!("Wrote license document {}", path.display());
        Ok(())
    }

    async fn scan(&self) -> LicenseResult<Vec<License>> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| {
            error!("Failed to read license directory {}: {e}", self.dir.display());
            e
        })?;

        let mut licenses = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            error!("Failed to list license directory {}: {e}", self.dir.display());
            e
        })? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
                continue;
            }

            // Unreadable or foreign documents are skipped, not fatal.
            match Self::read_document(&entry.path()).await {
                Ok(Some(license)) => licenses.push(license),
                Ok(None) => {}
                Err(e) => warn!("Skipping license document {name}: {e}"),
            }
        }

        licenses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(licenses)
    }

    /// Read-modify-write of one document under the lock, applied only while
    /// the stored license is `active`.
    async fn update_active(
        &self,
        id: &str,
        apply: impl FnOnce(&mut License) + Send,
    ) -> LicenseResult<ActiveUpdate> {
        let _guard = self.write_lock.lock().await;

        let Some(mut license) = self.get_by_id(id).await? else {
            return Ok(ActiveUpdate::Missing);
        };
        if !license.is_active() {
            return Ok(ActiveUpdate::Inactive(license.status));
        }

        apply(&mut license);
        self.write_document(&license).await?;
        Ok(ActiveUpdate::Updated(license))
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> LicenseResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| {
            error!("Failed to restrict permissions on {}: {e}", path.display());
            e
        })?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> LicenseResult<()> {
    Ok(())
}

#[async_trait]
impl LicenseStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn put(&self, license: &License) -> LicenseResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_document(license).await
    }

    async fn get_by_id(&self, id: &str) -> LicenseResult<Option<License>> {
        match self.path_for(id) {
            Some(path) => Self::read_document(&path).await,
            None => Ok(None),
        }
    }

    async fn get_by_key(&self, key: &str) -> LicenseResult<Option<License>> {
        Ok(self.scan().await?.into_iter().find(|l| l.key == key))
    }

    async fn get_active_for_organization(
        &self,
        org_id: &str,
    ) -> LicenseResult<Option<License>> {
        // scan() is already newest-first
        Ok(self
            .scan()
            .await?
            .into_iter()
            .find(|l| l.organization_id == org_id && l.is_active()))
    }

    async fn list(&self) -> LicenseResult<Vec<License>> {
        self.scan().await
    }

    async fn bind_hardware(
        &self,
        id: &str,
        hardware_id: &str,
        org_id: &str,
        now: DateTime<Utc>,
    ) -> LicenseResult<BindOutcome> {
        let _guard = self.write_lock.lock().await;

        let Some(mut license) = self.get_by_id(id).await? else {
            return Ok(BindOutcome::Missing);
        };

        if !license.is_active() {
            return Ok(BindOutcome::Inactive(license.status));
        }
        if license.is_bound() && license.hardware_id != hardware_id {
            return Ok(BindOutcome::Mismatch);
        }

        license.hardware_id = hardware_id.to_string();
        license.organization_id = org_id.to_string();
        license.last_validated = now;
        if license.activated_at.is_none() {
            license.activated_at = Some(now);
        }

        self.write_document(&license).await?;
        Ok(BindOutcome::Bound(license))
    }

    async fn touch_validated(&self, id: &str, now: DateTime<Utc>) -> LicenseResult<ActiveUpdate> {
        self.update_active(id, |license| license.last_validated = now)
            .await
    }

    async fn deactivate(&self, id: &str, status: LicenseStatus) -> LicenseResult<ActiveUpdate> {
        self.update_active(id, |license| license.status = status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::LicenseType;
    use chrono::Duration;

    fn license(id: &str, key: &str, org: &str, created: DateTime<Utc>) -> License {
        License::issue(
            id.to_string(),
            key.to_string(),
            LicenseType::Basic,
            org,
            created,
            Duration::days(30),
        )
        .unwrap()
    }

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_writes_one_document_per_license() {
        let (dir, store) = store().await;
        let l = license("a1", "KEY-A", "org", Utc::now());

        store.put(&l).await.unwrap();

        let path = dir.path().join("license_a1.json");
        assert!(path.is_file());
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(doc["key"], "KEY-A");
        assert_eq!(store.get_by_id("a1").await.unwrap(), Some(l));
    }

    #[tokio::test]
    async fn put_overwrites_existing_document() {
        let (_dir, store) = store().await;
        let mut l = license("a1", "KEY-A", "org", Utc::now());
        store.put(&l).await.unwrap();

        l.hardware_id = "hw".to_string();
        store.put(&l).await.unwrap();

        let stored = store.get_by_id("a1").await.unwrap().unwrap();
        assert_eq!(stored.hardware_id, "hw");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_and_unsafe_ids_are_not_found() {
        let (_dir, store) = store().await;
        assert_eq!(store.get_by_id("nope").await.unwrap(), None);
        assert_eq!(store.get_by_id("../etc/passwd").await.unwrap(), None);
        assert_eq!(store.get_by_key("KEY-X").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_by_key_scans_documents() {
        let (_dir, store) = store().await;
        store.put(&license("a1", "KEY-A", "org", Utc::now())).await.unwrap();
        store.put(&license("b2", "KEY-B", "org", Utc::now())).await.unwrap();

        let found = store.get_by_key("KEY-B").await.unwrap().unwrap();
        assert_eq!(found.id, "b2");
    }

    #[tokio::test]
    async fn active_lookup_prefers_newest_active() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        let older = license("old", "KEY-1", "org-1", now - Duration::days(2));
        let newer = license("new", "KEY-2", "org-1", now - Duration::days(1));
        let mut newest_revoked = license("rev", "KEY-3", "org-1", now);
        newest_revoked.status = crate::license::LicenseStatus::Revoked;
        let other_org = license("oth", "KEY-4", "org-2", now);

        for l in [&older, &newer, &newest_revoked, &other_org] {
            store.put(l).await.unwrap();
        }

        let active = store.get_active_for_organization("org-1").await.unwrap();
        assert_eq!(active.map(|l| l.id), Some("new".to_string()));
        assert_eq!(
            store.get_active_for_organization("org-3").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn list_skips_foreign_and_corrupt_files() {
        let (dir, store) = store().await;
        store.put(&license("a1", "KEY-A", "org", Utc::now())).await.unwrap();
        std::fs::write(dir.path().join("license_bad.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "a1");
    }

    #[tokio::test]
    async fn bind_is_conditional_on_hardware() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.put(&license("a1", "KEY-A", "", now)).await.unwrap();

        let first = store.bind_hardware("a1", "H1", "org-1", now).await.unwrap();
        let BindOutcome::Bound(bound) = first else {
            panic!("expected bind, got {first:?}");
        };
        assert_eq!(bound.hardware_id, "H1");
        assert_eq!(bound.organization_id, "org-1");
        assert_eq!(bound.activated_at, Some(now));

        let later = now + Duration::hours(1);
        assert_eq!(
            store.bind_hardware("a1", "H2", "org-1", later).await.unwrap(),
            BindOutcome::Mismatch
        );
        let unchanged = store.get_by_id("a1").await.unwrap().unwrap();
        assert_eq!(unchanged, bound);

        let again = store.bind_hardware("a1", "H1", "org-1", later).await.unwrap();
        let BindOutcome::Bound(again) = again else {
            panic!("expected rebind");
        };
        assert_eq!(again.activated_at, Some(now));
        assert_eq!(again.last_validated, later);

        assert_eq!(
            store.bind_hardware("zz", "H1", "org-1", later).await.unwrap(),
            BindOutcome::Missing
        );
    }

    #[tokio::test]
    async fn revoked_license_cannot_be_bound() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.put(&license("a1", "KEY-A", "", now)).await.unwrap();
        store.deactivate("a1", LicenseStatus::Revoked).await.unwrap();

        assert_eq!(
            store.bind_hardware("a1", "H1", "org-1", now).await.unwrap(),
            BindOutcome::Inactive(LicenseStatus::Revoked)
        );
        assert!(!store.get_by_id("a1").await.unwrap().unwrap().is_bound());
    }

    #[tokio::test]
    async fn conditional_writes_respect_terminal_states() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        store.put(&license("a1", "KEY-A", "org-1", now)).await.unwrap();
        store.bind_hardware("a1", "H1", "org-1", now).await.unwrap();

        let later = now + Duration::minutes(1);
        let ActiveUpdate::Updated(touched) = store.touch_validated("a1", later).await.unwrap()
        else {
            panic!("active license should be touched");
        };
        assert_eq!(touched.last_validated, later);
        assert_eq!(touched.hardware_id, "H1");

        store.deactivate("a1", LicenseStatus::Expired).await.unwrap();
        assert_eq!(
            store.deactivate("a1", LicenseStatus::Revoked).await.unwrap(),
            ActiveUpdate::Inactive(LicenseStatus::Expired)
        );
        assert_eq!(
            store.touch_validated("a1", later + Duration::minutes(1)).await.unwrap(),
            ActiveUpdate::Inactive(LicenseStatus::Expired)
        );

        let stored = store.get_by_id("a1").await.unwrap().unwrap();
        assert_eq!(stored.status, LicenseStatus::Expired);
        assert_eq!(stored.last_validated, later);
        assert_eq!(
            store.deactivate("zz", LicenseStatus::Revoked).await.unwrap(),
            ActiveUpdate::Missing
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn corrupt_document_is_logged_before_surfacing() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let (dir, store) = store().await;
        std::fs::write(dir.path().join("license_bad.json"), b"{not json").unwrap();

        let err = store.get_by_id("bad").await.unwrap_err();
        assert!(matches!(err, LicenseError::StoreUnavailable(_)));

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("Corrupt license document"), "{output}");
    }

    #[tokio::test]
    async fn concurrent_binds_admit_one_hardware_id() {
        let (_dir, store) = store().await;
        let store = std::sync::Arc::new(store);
        store.put(&license("a1", "KEY-A", "", Utc::now())).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .bind_hardware("a1", &format!("H{i}"), "org", Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut bound = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), BindOutcome::Bound(_)) {
                bound += 1;
            }
        }
        assert_eq!(bound, 1);
    }
}
