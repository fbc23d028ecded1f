//! Reservation-backed provisioning workflows.
//!
//! These are the entry points the CSI-facing create/delete handlers call
//! first: check whether a request name already has a live reservation (and
//! garbage collect anything stale), reserve a fresh identity, or undo a
//! reservation after a failed create.
//!
//! Stale reservations are leftovers of incomplete transactions: a journal
//! entry whose backing subvolume or snapshot is missing, or whose clone
//! settled in the failed state. They are torn down here (backend garbage
//! first, journal entry last) so the caller can proceed as on a first-time
//! request.
//!
//! Every method requires the caller to hold the request-name lock for the
//! whole check/act sequence; the CSI request-serialization layer provides
//! it.

use std::sync::Arc;

use tracing::{debug, warn};

use subvolcsi_backend::CloneState;
use subvolcsi_id::ObjectIdentifier;
use subvolcsi_journal::{JournalConfig, OmapStore, ReservationJournal};

use crate::clone::CloneOrchestrator;
use crate::error::{CoreError, CoreResult};
use crate::snapshot::SnapshotStore;
use crate::subvolume::SubvolumeStore;
use crate::types::{ClusterContext, SnapshotInfo, SubvolumeSpec};

/// Parameters of one volume request.
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    /// Orchestrator-supplied request name, unique per caller intent.
    pub request_name: String,
    /// Override for the generated-name prefix.
    pub name_prefix: Option<String>,
    /// Pool holding the journal omaps.
    pub metadata_pool: String,
    /// Filesystem the volume lives in.
    pub fs_name: String,
    /// Subvolume group within the filesystem.
    pub group: String,
    /// Requested size in bytes.
    pub size_bytes: u64,
    /// Optional pool placement hint.
    pub pool: Option<String>,
    /// Filesystem location ID embedded in the composite volume ID.
    pub fscid: i64,
}

/// Parameters of one snapshot request.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Orchestrator-supplied request name.
    pub request_name: String,
    /// Override for the generated-name prefix.
    pub name_prefix: Option<String>,
    /// Pool holding the journal omaps.
    pub metadata_pool: String,
    /// Filesystem location ID embedded in the composite snapshot ID.
    pub fscid: i64,
}

/// The content source a volume request clones from, if any.
#[derive(Debug, Clone)]
pub enum CloneSource {
    /// Clone of a live subvolume (through an intermediate snapshot).
    Subvolume {
        /// The source subvolume.
        parent: SubvolumeSpec,
    },
    /// Clone of a pre-existing, caller-owned snapshot.
    Snapshot {
        /// The subvolume the snapshot belongs to.
        parent: SubvolumeSpec,
        /// The backend snapshot name.
        snap_id: String,
    },
}

/// Identity of a provisioned volume: the backend name plus the composite ID
/// handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeIdentity {
    /// Generated backend subvolume name.
    pub backend_name: String,
    /// Composite volume ID.
    pub volume_id: String,
}

/// Identity of a provisioned snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotIdentity {
    /// Generated backend snapshot name.
    pub backend_name: String,
    /// Composite snapshot ID.
    pub snapshot_id: String,
}

/// Binds the reservation journals to the stores and orchestrator.
pub struct Provisioner {
    vol_journal: ReservationJournal,
    snap_journal: ReservationJournal,
    subvolumes: SubvolumeStore,
    snapshots: SnapshotStore,
    orchestrator: CloneOrchestrator,
    ctx: ClusterContext,
}

impl Provisioner {
    /// Builds a provisioner. `journal_suffix` namespaces the journal omaps,
    /// typically the CSI instance ID.
    pub fn new(
        store: Arc<dyn OmapStore>,
        journal_suffix: &str,
        subvolumes: SubvolumeStore,
        snapshots: SnapshotStore,
        orchestrator: CloneOrchestrator,
        ctx: ClusterContext,
    ) -> Self {
        Self {
            vol_journal: ReservationJournal::new(store.clone(), JournalConfig::volumes(journal_suffix)),
            snap_journal: ReservationJournal::new(store, JournalConfig::snapshots(journal_suffix)),
            subvolumes,
            snapshots,
            orchestrator,
            ctx,
        }
    }

    fn subvol_spec(&self, opts: &VolumeOptions, backend_name: &str) -> SubvolumeSpec {
        SubvolumeSpec {
            vol_id: backend_name.to_string(),
            fs_name: opts.fs_name.clone(),
            group: opts.group.clone(),
            pool: opts.pool.clone(),
            size_bytes: opts.size_bytes,
            features: Vec::new(),
        }
    }

    fn compose_id(&self, fscid: i64, uuid: &str) -> CoreResult<String> {
        Ok(ObjectIdentifier::new(&self.ctx.cluster_id, fscid, uuid).compose()?)
    }

    /// Checks whether `opts.request_name` already maps to a usable volume.
    ///
    /// Returns the existing identity when it does. Returns `None` after
    /// garbage collecting a stale reservation (missing subvolume, or a clone
    /// that settled failed). Surfaces `CloneInProgress`/`ClonePending` when
    /// the backing clone has not settled yet, so the caller retries later
    /// without touching anything.
    pub async fn check_volume_exists(
        &self,
        opts: &VolumeOptions,
        source: Option<&CloneSource>,
    ) -> CoreResult<Option<VolumeIdentity>> {
        let record = self
            .vol_journal
            .check_reservation(
                &opts.metadata_pool,
                &opts.request_name,
                opts.name_prefix.as_deref(),
                None,
            )
            .await?;
        let Some(record) = record else {
            return Ok(None);
        };
        let backend_name = record.attributes.image_name.clone();
        let target = self.subvol_spec(opts, &backend_name);

        if let Some(source) = source {
            match self.orchestrator.get_clone_status(&target).await {
                Ok(status) => match status.state {
                    CloneState::Complete => {}
                    CloneState::InProgress => {
                        return Err(CoreError::CloneInProgress {
                            clone: backend_name,
                        })
                    }
                    CloneState::Pending => {
                        return Err(CoreError::ClonePending {
                            clone: backend_name,
                        })
                    }
                    CloneState::Failed => {
                        self.subvolumes.purge(&target, true).await?;
                        self.cleanup_clone_source(source, &backend_name).await?;
                        self.vol_journal
                            .undo_reservation(
                                &opts.metadata_pool,
                                Some(&backend_name),
                                &opts.request_name,
                            )
                            .await?;

                        return Ok(None);
                    }
                },
                Err(CoreError::VolumeNotFound { .. }) => {
                    // The target vanished mid-clone; collect the leftovers.
                    self.cleanup_clone_source(source, &backend_name).await?;
                    self.vol_journal
                        .undo_reservation(
                            &opts.metadata_pool,
                            Some(&backend_name),
                            &opts.request_name,
                        )
                        .await?;

                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }

        match self.subvolumes.root_path(&target).await {
            Ok(_) => {}
            Err(CoreError::VolumeNotFound { .. }) => {
                // Crash between reserve and create: the journal entry has no
                // backing subvolume.
                if let Some(source) = source {
                    self.cleanup_clone_source(source, &backend_name).await?;
                }
                self.vol_journal
                    .undo_reservation(
                        &opts.metadata_pool,
                        Some(&backend_name),
                        &opts.request_name,
                    )
                    .await?;

                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        let volume_id = self.compose_id(opts.fscid, &record.image_uuid)?;
        debug!(
            volume_id = %volume_id,
            subvolume = %backend_name,
            request = %opts.request_name,
            "found existing volume for request"
        );

        // The clone settled; its intermediate snapshot can go now.
        if let Some(source) = source {
            self.cleanup_clone_source(source, &backend_name).await?;
        }

        Ok(Some(VolumeIdentity {
            backend_name,
            volume_id,
        }))
    }

    /// Reserves a fresh identity for a volume request.
    pub async fn reserve_volume(&self, opts: &VolumeOptions) -> CoreResult<VolumeIdentity> {
        let (uuid, backend_name) = self
            .vol_journal
            .reserve_name(
                &opts.metadata_pool,
                &opts.request_name,
                opts.name_prefix.as_deref(),
                None,
            )
            .await?;
        let volume_id = self.compose_id(opts.fscid, &uuid)?;
        debug!(
            volume_id = %volume_id,
            subvolume = %backend_name,
            request = %opts.request_name,
            "reserved volume identity"
        );

        Ok(VolumeIdentity {
            backend_name,
            volume_id,
        })
    }

    /// Undoes a volume reservation. Idempotent.
    pub async fn undo_volume_reservation(
        &self,
        opts: &VolumeOptions,
        backend_name: &str,
    ) -> CoreResult<()> {
        self.vol_journal
            .undo_reservation(&opts.metadata_pool, Some(backend_name), &opts.request_name)
            .await?;

        Ok(())
    }

    /// Checks whether `opts.request_name` already maps to a usable snapshot
    /// of `parent`.
    ///
    /// A reservation whose backing snapshot is missing is garbage collected
    /// and reported as `None`. A reservation pointing at a different parent
    /// is a request-name conflict and surfaces as an error.
    pub async fn check_snapshot_exists(
        &self,
        opts: &SnapshotOptions,
        parent: &SubvolumeSpec,
    ) -> CoreResult<Option<(SnapshotIdentity, SnapshotInfo)>> {
        let record = self
            .snap_journal
            .check_reservation(
                &opts.metadata_pool,
                &opts.request_name,
                opts.name_prefix.as_deref(),
                Some(&parent.vol_id),
            )
            .await?;
        let Some(record) = record else {
            return Ok(None);
        };
        let backend_name = record.attributes.image_name.clone();

        let info = match self.snapshots.get_info(parent, &backend_name).await {
            Ok(info) => info,
            Err(CoreError::SnapshotNotFound { .. }) => {
                self.snap_journal
                    .undo_reservation(
                        &opts.metadata_pool,
                        Some(&backend_name),
                        &opts.request_name,
                    )
                    .await?;

                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let snapshot_id = match self.compose_id(opts.fscid, &record.image_uuid) {
            Ok(id) => id,
            Err(err) => {
                // A snapshot we cannot mint an ID for is useless; tear it
                // down so the retry starts clean, but keep the original
                // error.
                if let Err(cleanup_err) = self.snapshots.delete(parent, &backend_name).await {
                    warn!(
                        snapshot = %backend_name,
                        error = %cleanup_err,
                        "failed to delete snapshot"
                    );
                } else if let Err(undo_err) = self
                    .snap_journal
                    .undo_reservation(
                        &opts.metadata_pool,
                        Some(&backend_name),
                        &opts.request_name,
                    )
                    .await
                {
                    warn!(
                        snapshot = %backend_name,
                        error = %undo_err,
                        "removing reservation failed"
                    );
                }

                return Err(err);
            }
        };

        debug!(
            snapshot_id = %snapshot_id,
            snapshot = %backend_name,
            request = %opts.request_name,
            "found existing snapshot for request"
        );

        Ok(Some((
            SnapshotIdentity {
                backend_name,
                snapshot_id,
            },
            info,
        )))
    }

    /// Reserves a fresh identity for a snapshot request against `parent`.
    pub async fn reserve_snapshot(
        &self,
        opts: &SnapshotOptions,
        parent: &SubvolumeSpec,
    ) -> CoreResult<SnapshotIdentity> {
        let (uuid, backend_name) = self
            .snap_journal
            .reserve_name(
                &opts.metadata_pool,
                &opts.request_name,
                opts.name_prefix.as_deref(),
                Some(&parent.vol_id),
            )
            .await?;
        let snapshot_id = self.compose_id(opts.fscid, &uuid)?;
        debug!(
            snapshot_id = %snapshot_id,
            snapshot = %backend_name,
            request = %opts.request_name,
            "reserved snapshot identity"
        );

        Ok(SnapshotIdentity {
            backend_name,
            snapshot_id,
        })
    }

    /// Undoes a snapshot reservation. Idempotent.
    pub async fn undo_snapshot_reservation(
        &self,
        opts: &SnapshotOptions,
        backend_name: &str,
    ) -> CoreResult<()> {
        self.snap_journal
            .undo_reservation(&opts.metadata_pool, Some(backend_name), &opts.request_name)
            .await?;

        Ok(())
    }

    /// Removes the intermediate snapshot left on a subvolume clone source.
    /// Snapshot-sourced clones have nothing to clean up.
    async fn cleanup_clone_source(
        &self,
        source: &CloneSource,
        backend_name: &str,
    ) -> CoreResult<()> {
        if let CloneSource::Subvolume { parent } = source {
            self.orchestrator
                .cleanup_snapshot_from_subvolume(parent, backend_name)
                .await?;
        }

        Ok(())
    }
}
