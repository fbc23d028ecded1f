//! In-memory mock backend with call recording and fault injection.
//!
//! `MockFsAdmin` models just enough backend behavior for the orchestration
//! test suites: group/subvolume/snapshot bookkeeping, protection state,
//! pending-clone tracking, scripted clone-status sequences, and per-operation
//! injected failures. It reproduces the backend quirks the core has to
//! tolerate: create-on-existing acting as a quota update, and one
//! already-exists error code shared by "already protected" and "already
//! unprotected".

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::admin::FsAdmin;
use crate::error::{BackendError, BackendResult};
use crate::types::{
    CloneState, CloneStatus, QuotaBytes, RemoveFlags, SnapshotEntry, SubvolumeEntry,
    SubvolumeState,
};

/// Mock record of a subvolume.
#[derive(Debug, Clone)]
pub struct MockSubvolume {
    /// Quota in bytes; 0 means no quota set.
    pub size_bytes: u64,
    /// Feature markers reported in subvolume info.
    pub features: Vec<String>,
    /// Lifecycle state.
    pub state: SubvolumeState,
    /// Pool the subvolume was placed in, if requested.
    pub pool: Option<String>,
    /// Metadata key/value pairs.
    pub metadata: HashMap<String, String>,
    /// Snapshots by name.
    pub snapshots: HashMap<String, MockSnapshot>,
}

/// Mock record of a snapshot.
#[derive(Debug, Clone)]
pub struct MockSnapshot {
    /// Protection state.
    pub protected: bool,
    /// Creation time, seconds since epoch.
    pub created_at_secs: u64,
    /// Metadata key/value pairs.
    pub metadata: HashMap<String, String>,
    /// Number of clones still materializing from this snapshot.
    pub pending_clones: u32,
}

#[derive(Debug)]
enum FailureMode {
    Always(BackendError),
    Once(BackendError),
}

#[derive(Debug)]
struct CloneRecord {
    source: (String, String, String, String),
    statuses: VecDeque<CloneStatus>,
    last: CloneStatus,
    settled: bool,
}

#[derive(Debug, Default)]
struct MockState {
    groups: HashSet<(String, String)>,
    subvolumes: HashMap<(String, String, String), MockSubvolume>,
    clones: HashMap<String, CloneRecord>,
    clone_scripts: HashMap<String, VecDeque<CloneStatus>>,
    next_created_at: u64,
}

/// Instrumented in-memory implementation of [`FsAdmin`].
#[derive(Default)]
pub struct MockFsAdmin {
    state: Mutex<MockState>,
    calls: Mutex<HashMap<String, u64>>,
    failures: Mutex<HashMap<String, FailureMode>>,
}

impl MockFsAdmin {
    /// Creates an empty mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many times the named operation was invoked.
    pub fn calls(&self, op: &str) -> u64 {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    /// Makes every future invocation of `op` fail with `err` until cleared.
    pub fn fail_with(&self, op: &str, err: BackendError) {
        self.failures
            .lock()
            .insert(op.to_string(), FailureMode::Always(err));
    }

    /// Makes only the next invocation of `op` fail with `err`.
    pub fn fail_once(&self, op: &str, err: BackendError) {
        self.failures
            .lock()
            .insert(op.to_string(), FailureMode::Once(err));
    }

    /// Clears any injected failure for `op`.
    pub fn clear_failure(&self, op: &str) {
        self.failures.lock().remove(op);
    }

    /// Scripts the clone-status sequence returned for `target_id`. The final
    /// status repeats once the sequence is exhausted.
    pub fn script_clone_states(&self, target_id: &str, statuses: Vec<CloneStatus>) {
        self.state
            .lock()
            .clone_scripts
            .insert(target_id.to_string(), statuses.into());
    }

    /// Seeds a subvolume (and its group) directly into the backend.
    pub fn seed_subvolume(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        size_bytes: u64,
        features: &[&str],
    ) {
        let mut state = self.state.lock();
        state.groups.insert((fs.to_string(), group.to_string()));
        state.subvolumes.insert(
            (fs.to_string(), group.to_string(), id.to_string()),
            MockSubvolume {
                size_bytes,
                features: features.iter().map(|f| f.to_string()).collect(),
                state: SubvolumeState::Complete,
                pool: None,
                metadata: HashMap::new(),
                snapshots: HashMap::new(),
            },
        );
    }

    /// Seeds a snapshot on an existing subvolume.
    pub fn seed_snapshot(&self, fs: &str, group: &str, vol: &str, snap: &str, protected: bool) {
        let mut state = self.state.lock();
        state.next_created_at += 1;
        let created_at_secs = state.next_created_at;
        if let Some(sv) = state
            .subvolumes
            .get_mut(&(fs.to_string(), group.to_string(), vol.to_string()))
        {
            sv.snapshots.insert(
                snap.to_string(),
                MockSnapshot {
                    protected,
                    created_at_secs,
                    metadata: HashMap::new(),
                    pending_clones: 0,
                },
            );
        }
    }

    /// Returns a copy of the named subvolume record, if present.
    pub fn subvolume(&self, fs: &str, group: &str, id: &str) -> Option<MockSubvolume> {
        self.state
            .lock()
            .subvolumes
            .get(&(fs.to_string(), group.to_string(), id.to_string()))
            .cloned()
    }

    /// Returns a copy of the named snapshot record, if present.
    pub fn snapshot(&self, fs: &str, group: &str, vol: &str, snap: &str) -> Option<MockSnapshot> {
        self.state
            .lock()
            .subvolumes
            .get(&(fs.to_string(), group.to_string(), vol.to_string()))
            .and_then(|sv| sv.snapshots.get(snap).cloned())
    }

    /// True if the group exists.
    pub fn group_exists(&self, fs: &str, group: &str) -> bool {
        self.state
            .lock()
            .groups
            .contains(&(fs.to_string(), group.to_string()))
    }

    /// Removes a group behind the cache's back, for self-heal tests.
    pub fn drop_group(&self, fs: &str, group: &str) {
        self.state
            .lock()
            .groups
            .remove(&(fs.to_string(), group.to_string()));
    }

    fn enter(&self, op: &str) -> BackendResult<()> {
        *self.calls.lock().entry(op.to_string()).or_insert(0) += 1;

        let mut failures = self.failures.lock();
        match failures.get(op) {
            Some(FailureMode::Always(err)) => Err(err.clone()),
            Some(FailureMode::Once(_)) => {
                let Some(FailureMode::Once(err)) = failures.remove(op) else {
                    unreachable!()
                };
                Err(err)
            }
            None => Ok(()),
        }
    }
}

fn key(fs: &str, group: &str, id: &str) -> (String, String, String) {
    (fs.to_string(), group.to_string(), id.to_string())
}

#[async_trait]
impl FsAdmin for MockFsAdmin {
    async fn create_subvolume_group(&self, fs: &str, group: &str) -> BackendResult<()> {
        self.enter("create_subvolume_group")?;
        self.state
            .lock()
            .groups
            .insert((fs.to_string(), group.to_string()));

        Ok(())
    }

    async fn create_subvolume(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        size_bytes: u64,
        pool: Option<&str>,
    ) -> BackendResult<()> {
        self.enter("create_subvolume")?;
        let mut state = self.state.lock();
        if !state.groups.contains(&(fs.to_string(), group.to_string())) {
            return Err(BackendError::not_found(format!("{fs}/{group}")));
        }
        match state.subvolumes.get_mut(&key(fs, group, id)) {
            // Create-on-existing updates the quota and leaves contents alone;
            // the resize-via-recreate fallback depends on this.
            Some(existing) => existing.size_bytes = size_bytes,
            None => {
                state.subvolumes.insert(
                    key(fs, group, id),
                    MockSubvolume {
                        size_bytes,
                        features: Vec::new(),
                        state: SubvolumeState::Complete,
                        pool: pool.map(|p| p.to_string()),
                        metadata: HashMap::new(),
                        snapshots: HashMap::new(),
                    },
                );
            }
        }

        Ok(())
    }

    async fn subvolume_path(&self, fs: &str, group: &str, id: &str) -> BackendResult<String> {
        self.enter("subvolume_path")?;
        let state = self.state.lock();
        if !state.subvolumes.contains_key(&key(fs, group, id)) {
            return Err(BackendError::not_found(format!("{fs}/{group}/{id}")));
        }

        Ok(format!("/volumes/{group}/{id}"))
    }

    async fn subvolume_info(
        &self,
        fs: &str,
        group: &str,
        id: &str,
    ) -> BackendResult<SubvolumeEntry> {
        self.enter("subvolume_info")?;
        let state = self.state.lock();
        let sv = state
            .subvolumes
            .get(&key(fs, group, id))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{id}")))?;

        let bytes_quota = match (sv.state, sv.size_bytes) {
            (SubvolumeState::SnapshotRetained, _) => QuotaBytes::Unreported,
            (_, 0) => QuotaBytes::Infinite,
            (_, size) => QuotaBytes::Bytes(size),
        };

        Ok(SubvolumeEntry {
            path: format!("/volumes/{group}/{id}"),
            bytes_quota,
            features: sv.features.clone(),
            state: sv.state,
        })
    }

    async fn resize_subvolume(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        size_bytes: u64,
    ) -> BackendResult<()> {
        self.enter("resize_subvolume")?;
        let mut state = self.state.lock();
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, id))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{id}")))?;
        sv.size_bytes = size_bytes;

        Ok(())
    }

    async fn remove_subvolume(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        flags: RemoveFlags,
    ) -> BackendResult<()> {
        self.enter("remove_subvolume")?;
        let mut state = self.state.lock();
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, id))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{id}")))?;
        if !sv.snapshots.is_empty() {
            if !flags.retain_snapshots {
                return Err(BackendError::NotEmpty {
                    object: format!("{fs}/{group}/{id}"),
                });
            }
            sv.state = SubvolumeState::SnapshotRetained;
            sv.size_bytes = 0;

            return Ok(());
        }
        state.subvolumes.remove(&key(fs, group, id));

        Ok(())
    }

    async fn create_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<()> {
        self.enter("create_snapshot")?;
        let mut state = self.state.lock();
        state.next_created_at += 1;
        let created_at_secs = state.next_created_at;
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, vol))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{vol}")))?;
        if sv.snapshots.contains_key(snap) {
            return Err(BackendError::already_exists(snap));
        }
        sv.snapshots.insert(
            snap.to_string(),
            MockSnapshot {
                protected: false,
                created_at_secs,
                metadata: HashMap::new(),
                pending_clones: 0,
            },
        );

        Ok(())
    }

    async fn remove_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<()> {
        self.enter("remove_snapshot")?;
        let mut state = self.state.lock();
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, vol))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{vol}")))?;
        let entry = sv
            .snapshots
            .get(snap)
            .ok_or_else(|| BackendError::not_found(snap))?;
        if entry.protected {
            return Err(BackendError::other(format!("snapshot {snap} is protected")));
        }
        if entry.pending_clones > 0 {
            return Err(BackendError::NotEmpty {
                object: snap.to_string(),
            });
        }
        sv.snapshots.remove(snap);

        Ok(())
    }

    async fn protect_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<()> {
        self.enter("protect_snapshot")?;
        let mut state = self.state.lock();
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, vol))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{vol}")))?;
        let entry = sv
            .snapshots
            .get_mut(snap)
            .ok_or_else(|| BackendError::not_found(snap))?;
        if entry.protected {
            return Err(BackendError::already_exists(snap));
        }
        entry.protected = true;

        Ok(())
    }

    async fn unprotect_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<()> {
        self.enter("unprotect_snapshot")?;
        let mut state = self.state.lock();
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, vol))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{vol}")))?;
        let entry = sv
            .snapshots
            .get_mut(snap)
            .ok_or_else(|| BackendError::not_found(snap))?;
        if entry.pending_clones > 0 {
            return Err(BackendError::NotEmpty {
                object: snap.to_string(),
            });
        }
        if !entry.protected {
            // The backend reuses the already-exists code for "already
            // unprotected".
            return Err(BackendError::already_exists(snap));
        }
        entry.protected = false;

        Ok(())
    }

    async fn snapshot_info(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
    ) -> BackendResult<SnapshotEntry> {
        self.enter("snapshot_info")?;
        let state = self.state.lock();
        let entry = state
            .subvolumes
            .get(&key(fs, group, vol))
            .and_then(|sv| sv.snapshots.get(snap))
            .ok_or_else(|| BackendError::not_found(snap))?;

        Ok(SnapshotEntry {
            created_at_secs: entry.created_at_secs,
            protected: entry.protected,
            has_pending_clones: entry.pending_clones > 0,
        })
    }

    async fn clone_snapshot(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
        target_id: &str,
        target_group: &str,
        pool: Option<&str>,
    ) -> BackendResult<()> {
        self.enter("clone_snapshot")?;
        let mut state = self.state.lock();
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, vol))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{vol}")))?;
        let entry = sv
            .snapshots
            .get_mut(snap)
            .ok_or_else(|| BackendError::not_found(snap))?;
        entry.pending_clones += 1;

        // The clone target materializes without inheriting the source quota;
        // callers compensate with an explicit expand once the clone settles.
        state.subvolumes.insert(
            key(fs, target_group, target_id),
            MockSubvolume {
                size_bytes: 0,
                features: Vec::new(),
                state: SubvolumeState::Complete,
                pool: pool.map(|p| p.to_string()),
                metadata: HashMap::new(),
                snapshots: HashMap::new(),
            },
        );

        let statuses = state
            .clone_scripts
            .remove(target_id)
            .unwrap_or_else(|| VecDeque::from([CloneStatus::new(CloneState::Complete)]));
        state.clones.insert(
            target_id.to_string(),
            CloneRecord {
                source: (
                    fs.to_string(),
                    group.to_string(),
                    vol.to_string(),
                    snap.to_string(),
                ),
                statuses,
                last: CloneStatus::new(CloneState::Pending),
                settled: false,
            },
        );

        Ok(())
    }

    async fn clone_status(
        &self,
        fs: &str,
        group: &str,
        target_id: &str,
    ) -> BackendResult<CloneStatus> {
        self.enter("clone_status")?;
        let _ = (fs, group);
        let mut state = self.state.lock();
        let record = state
            .clones
            .get_mut(target_id)
            .ok_or_else(|| BackendError::not_found(target_id))?;
        let status = match record.statuses.pop_front() {
            Some(status) => {
                record.last = status.clone();
                status
            }
            None => record.last.clone(),
        };

        let terminal = matches!(status.state, CloneState::Complete | CloneState::Failed);
        if terminal && !record.settled {
            let source = record.source.clone();
            record.settled = true;
            if let Some(entry) = state
                .subvolumes
                .get_mut(&key(&source.0, &source.1, &source.2))
                .and_then(|sv| sv.snapshots.get_mut(&source.3))
            {
                entry.pending_clones = entry.pending_clones.saturating_sub(1);
            }
        }

        Ok(status)
    }

    async fn set_subvolume_metadata(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        key_name: &str,
        value: &str,
    ) -> BackendResult<()> {
        self.enter("set_subvolume_metadata")?;
        let mut state = self.state.lock();
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, id))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{id}")))?;
        sv.metadata.insert(key_name.to_string(), value.to_string());

        Ok(())
    }

    async fn remove_subvolume_metadata(
        &self,
        fs: &str,
        group: &str,
        id: &str,
        key_name: &str,
    ) -> BackendResult<()> {
        self.enter("remove_subvolume_metadata")?;
        let mut state = self.state.lock();
        let sv = state
            .subvolumes
            .get_mut(&key(fs, group, id))
            .ok_or_else(|| BackendError::not_found(format!("{fs}/{group}/{id}")))?;
        if sv.metadata.remove(key_name).is_none() {
            return Err(BackendError::NoSuchKey {
                key: key_name.to_string(),
            });
        }

        Ok(())
    }

    async fn set_snapshot_metadata(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
        key_name: &str,
        value: &str,
    ) -> BackendResult<()> {
        self.enter("set_snapshot_metadata")?;
        let mut state = self.state.lock();
        let entry = state
            .subvolumes
            .get_mut(&key(fs, group, vol))
            .and_then(|sv| sv.snapshots.get_mut(snap))
            .ok_or_else(|| BackendError::not_found(snap))?;
        entry.metadata.insert(key_name.to_string(), value.to_string());

        Ok(())
    }

    async fn remove_snapshot_metadata(
        &self,
        fs: &str,
        group: &str,
        vol: &str,
        snap: &str,
        key_name: &str,
    ) -> BackendResult<()> {
        self.enter("remove_snapshot_metadata")?;
        let mut state = self.state.lock();
        let entry = state
            .subvolumes
            .get_mut(&key(fs, group, vol))
            .and_then(|sv| sv.snapshots.get_mut(snap))
            .ok_or_else(|| BackendError::not_found(snap))?;
        if entry.metadata.remove(key_name).is_none() {
            return Err(BackendError::NoSuchKey {
                key: key_name.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock() -> MockFsAdmin {
        MockFsAdmin::new()
    }

    #[tokio::test]
    async fn test_create_subvolume_requires_group() {
        let m = mock();
        let err = m
            .create_subvolume("fs1", "g1", "vol-1", 1024, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_subvolume_after_group() {
        let m = mock();
        m.create_subvolume_group("fs1", "g1").await.unwrap();
        m.create_subvolume("fs1", "g1", "vol-1", 1024, None)
            .await
            .unwrap();
        assert_eq!(m.subvolume("fs1", "g1", "vol-1").unwrap().size_bytes, 1024);
    }

    #[tokio::test]
    async fn test_create_on_existing_updates_quota() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.create_subvolume("fs1", "g1", "vol-1", 4096, None)
            .await
            .unwrap();
        assert_eq!(m.subvolume("fs1", "g1", "vol-1").unwrap().size_bytes, 4096);
    }

    #[tokio::test]
    async fn test_call_counting() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.subvolume_info("fs1", "g1", "vol-1").await.unwrap();
        m.subvolume_info("fs1", "g1", "vol-1").await.unwrap();
        assert_eq!(m.calls("subvolume_info"), 2);
        assert_eq!(m.calls("resize_subvolume"), 0);
    }

    #[tokio::test]
    async fn test_fail_once_clears_after_one_call() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.fail_once("subvolume_info", BackendError::other("flake"));
        assert!(m.subvolume_info("fs1", "g1", "vol-1").await.is_err());
        assert!(m.subvolume_info("fs1", "g1", "vol-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_with_is_sticky() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.fail_with("resize_subvolume", BackendError::not_implemented("resize"));
        assert!(m.resize_subvolume("fs1", "g1", "vol-1", 1).await.is_err());
        assert!(m.resize_subvolume("fs1", "g1", "vol-1", 1).await.is_err());
        m.clear_failure("resize_subvolume");
        assert!(m.resize_subvolume("fs1", "g1", "vol-1", 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_quota_infinite_when_unset() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 0, &[]);
        let info = m.subvolume_info("fs1", "g1", "vol-1").await.unwrap();
        assert_eq!(info.bytes_quota, QuotaBytes::Infinite);
    }

    #[tokio::test]
    async fn test_remove_subvolume_with_snapshots_requires_retention() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", false);

        let err = m
            .remove_subvolume("fs1", "g1", "vol-1", RemoveFlags::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotEmpty { .. }));

        m.remove_subvolume(
            "fs1",
            "g1",
            "vol-1",
            RemoveFlags {
                force: true,
                retain_snapshots: true,
            },
        )
        .await
        .unwrap();
        let sv = m.subvolume("fs1", "g1", "vol-1").unwrap();
        assert_eq!(sv.state, SubvolumeState::SnapshotRetained);
    }

    #[tokio::test]
    async fn test_protect_twice_returns_already_exists() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", false);
        m.protect_snapshot("fs1", "g1", "vol-1", "snap-1")
            .await
            .unwrap();
        let err = m
            .protect_snapshot("fs1", "g1", "vol-1", "snap-1")
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_unprotect_unprotected_returns_already_exists() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", false);
        let err = m
            .unprotect_snapshot("fs1", "g1", "vol-1", "snap-1")
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_remove_protected_snapshot_fails() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", true);
        assert!(m
            .remove_snapshot("fs1", "g1", "vol-1", "snap-1")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_clone_defaults_to_complete() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", true);
        m.clone_snapshot("fs1", "g1", "vol-1", "snap-1", "clone-1", "g1", None)
            .await
            .unwrap();
        let status = m.clone_status("fs1", "g1", "clone-1").await.unwrap();
        assert_eq!(status.state, CloneState::Complete);
        assert!(m.subvolume("fs1", "g1", "clone-1").is_some());
    }

    #[tokio::test]
    async fn test_clone_target_has_no_quota() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 10 << 30, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", true);
        m.clone_snapshot("fs1", "g1", "vol-1", "snap-1", "clone-1", "g1", None)
            .await
            .unwrap();
        assert_eq!(m.subvolume("fs1", "g1", "clone-1").unwrap().size_bytes, 0);
    }

    #[tokio::test]
    async fn test_scripted_clone_states_play_in_order() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", true);
        m.script_clone_states(
            "clone-1",
            vec![
                CloneStatus::new(CloneState::Pending),
                CloneStatus::new(CloneState::InProgress),
                CloneStatus::new(CloneState::Complete),
            ],
        );
        m.clone_snapshot("fs1", "g1", "vol-1", "snap-1", "clone-1", "g1", None)
            .await
            .unwrap();

        let states: Vec<CloneState> = [
            m.clone_status("fs1", "g1", "clone-1").await.unwrap().state,
            m.clone_status("fs1", "g1", "clone-1").await.unwrap().state,
            m.clone_status("fs1", "g1", "clone-1").await.unwrap().state,
            m.clone_status("fs1", "g1", "clone-1").await.unwrap().state,
        ]
        .to_vec();
        assert_eq!(
            states,
            vec![
                CloneState::Pending,
                CloneState::InProgress,
                CloneState::Complete,
                CloneState::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_pending_clones_block_unprotect_until_settled() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", true);
        m.clone_snapshot("fs1", "g1", "vol-1", "snap-1", "clone-1", "g1", None)
            .await
            .unwrap();

        let err = m
            .unprotect_snapshot("fs1", "g1", "vol-1", "snap-1")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotEmpty { .. }));

        // Settle the clone, then unprotect succeeds.
        m.clone_status("fs1", "g1", "clone-1").await.unwrap();
        m.unprotect_snapshot("fs1", "g1", "vol-1", "snap-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_metadata_set_remove() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.set_subvolume_metadata("fs1", "g1", "vol-1", "owner", "alice")
            .await
            .unwrap();
        assert_eq!(
            m.subvolume("fs1", "g1", "vol-1").unwrap().metadata["owner"],
            "alice"
        );
        m.remove_subvolume_metadata("fs1", "g1", "vol-1", "owner")
            .await
            .unwrap();
        let err = m
            .remove_subvolume_metadata("fs1", "g1", "vol-1", "owner")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NoSuchKey { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_metadata_set_remove() {
        let m = mock();
        m.seed_subvolume("fs1", "g1", "vol-1", 1024, &[]);
        m.seed_snapshot("fs1", "g1", "vol-1", "snap-1", false);
        m.set_snapshot_metadata("fs1", "g1", "vol-1", "snap-1", "k", "v")
            .await
            .unwrap();
        m.remove_snapshot_metadata("fs1", "g1", "vol-1", "snap-1", "k")
            .await
            .unwrap();
        let err = m
            .remove_snapshot_metadata("fs1", "g1", "vol-1", "snap-1", "k")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NoSuchKey { .. }));
    }
}
