//! The reservation protocol over the omap store.
//!
//! Two object levels per journal:
//! - a directory object (`csi.volumes.<suffix>` / `csi.snaps.<suffix>`)
//!   mapping `<key prefix><request name>` to the reserved UUID;
//! - one object per UUID (`<uuid prefix><uuid>`) holding back-pointers:
//!   the request name, the generated object name, and for snapshots the
//!   source volume name.
//!
//! Reservation creates the UUID object first (to claim the UUID), then the
//! directory key, then the back-pointers. Undo runs in exact reverse order.
//! A directory key whose UUID object is missing or incomplete is therefore a
//! leftover of an incomplete transaction and safe to garbage collect.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{JournalError, JournalResult};
use crate::omap::{OmapError, OmapStore};

/// String length of an encoded UUID.
const UUID_ENCODED_LEN: usize = 36;

/// Attempts at generating a non-colliding UUID before giving up.
const MAX_UUID_ATTEMPTS: u32 = 5;

/// Key layout of one journal instance.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory object holding request-name keys.
    pub csi_directory: String,
    /// Prefix for request-name keys within the directory object.
    pub csi_name_key_prefix: String,
    /// Prefix for per-UUID object IDs.
    pub uuid_directory_prefix: String,
    /// Key under which the request name is stored in the UUID object.
    pub csi_name_key: String,
    /// Key under which the generated object name is stored in the UUID object.
    pub csi_image_key: String,
    /// Key under which the snapshot source volume is stored; `None` for
    /// volume journals, which do not track sources.
    pub source_key: Option<String>,
    /// Object-store namespace all journal objects live in.
    pub namespace: String,
    /// Default prefix for generated object names.
    pub naming_prefix: String,
}

impl JournalConfig {
    /// Layout for the volume journal.
    pub fn volumes(suffix: &str) -> Self {
        Self {
            csi_directory: format!("csi.volumes.{suffix}"),
            csi_name_key_prefix: "csi.volume.".to_string(),
            uuid_directory_prefix: "csi.volume.".to_string(),
            csi_name_key: "csi.volname".to_string(),
            csi_image_key: "csi.imagename".to_string(),
            source_key: None,
            namespace: "csi".to_string(),
            naming_prefix: "csi-vol-".to_string(),
        }
    }

    /// Layout for the snapshot journal.
    pub fn snapshots(suffix: &str) -> Self {
        Self {
            csi_directory: format!("csi.snaps.{suffix}"),
            csi_name_key_prefix: "csi.snap.".to_string(),
            uuid_directory_prefix: "csi.snap.".to_string(),
            csi_name_key: "csi.snapname".to_string(),
            csi_image_key: "csi.imagename".to_string(),
            source_key: Some("csi.source".to_string()),
            namespace: "csi".to_string(),
            naming_prefix: "csi-snap-".to_string(),
        }
    }
}

/// Back-pointers stored in a UUID directory object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttributes {
    /// The orchestrator-supplied request name this reservation serves.
    pub request_name: String,
    /// The generated backend object name.
    pub image_name: String,
    /// Source volume name, for snapshot reservations.
    pub source_name: Option<String>,
}

/// A live reservation: the UUID plus its back-pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRecord {
    /// The UUID reserved for the request.
    pub image_uuid: String,
    /// Back-pointers read from the UUID directory.
    pub attributes: ImageAttributes,
}

/// Reservation journal bound to one omap store and key layout.
///
/// Callers must hold a request-name-scoped lock across any
/// check/reserve/undo sequence for the same request name; unlocked
/// concurrent access can leave the two omap levels inconsistent.
pub struct ReservationJournal {
    store: Arc<dyn OmapStore>,
    config: JournalConfig,
}

impl ReservationJournal {
    /// Creates a journal over the given store and layout.
    pub fn new(store: Arc<dyn OmapStore>, config: JournalConfig) -> Self {
        Self { store, config }
    }

    /// The key layout in use.
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// The generated object name for a UUID under the given (or default)
    /// naming prefix.
    pub fn generated_name(&self, name_prefix: Option<&str>, uuid: &str) -> String {
        let prefix = name_prefix.unwrap_or(&self.config.naming_prefix);
        format!("{prefix}{uuid}")
    }

    /// Looks up an existing reservation for `request_name`.
    ///
    /// Returns `None` when no reservation exists. A directory entry whose
    /// UUID object is missing or incomplete is garbage collected and
    /// reported as `None`, so the caller proceeds as on a first-time
    /// request. For snapshot journals, `snap_source` is matched against the
    /// stored source and a mismatch is an error (request-name conflict).
    pub async fn check_reservation(
        &self,
        pool: &str,
        request_name: &str,
        name_prefix: Option<&str>,
        snap_source: Option<&str>,
    ) -> JournalResult<Option<ReservationRecord>> {
        if snap_source.is_some() && self.config.source_key.is_none() {
            return Err(JournalError::SourceUnsupported);
        }

        let dir_key = format!("{}{}", self.config.csi_name_key_prefix, request_name);
        let values = match self
            .store
            .get_keys(
                pool,
                &self.config.namespace,
                &self.config.csi_directory,
                &[dir_key.clone()],
            )
            .await
        {
            Ok(values) => values,
            // The directory object (or its pool) not existing simply means
            // nothing was ever reserved here.
            Err(OmapError::ObjectNotFound { .. }) | Err(OmapError::PoolNotFound { .. }) => {
                return Ok(None)
            }
            Err(err) => return Err(err.into()),
        };
        let Some(uuid) = values.get(&dir_key) else {
            return Ok(None);
        };

        let Some(attributes) = self.image_attributes(pool, uuid).await? else {
            // Stale: the request name points at a UUID whose object is gone
            // or incomplete. Collect the leftovers and report no reservation.
            warn!(
                request = %request_name,
                uuid = %uuid,
                "stale reservation, garbage collecting"
            );
            let generated = self.generated_name(name_prefix, uuid);
            self.undo_reservation(pool, Some(&generated), request_name)
                .await?;

            return Ok(None);
        };

        if attributes.request_name != request_name {
            // Never expected; do not clean up automatically.
            return Err(JournalError::StateInconsistent {
                request_name: request_name.to_string(),
                uuid: uuid.clone(),
                stored_request: attributes.request_name,
            });
        }

        if let Some(expected_source) = snap_source {
            if attributes.source_name.as_deref() != Some(expected_source) {
                return Err(JournalError::SnapSourceConflict {
                    request_name: request_name.to_string(),
                    expected_source: expected_source.to_string(),
                    stored_source: attributes.source_name.unwrap_or_default(),
                });
            }
        }

        Ok(Some(ReservationRecord {
            image_uuid: uuid.clone(),
            attributes,
        }))
    }

    /// Reserves a fresh UUID and generated name for `request_name`.
    ///
    /// Fails with [`JournalError::ReservationExists`] if a live directory
    /// entry already exists; callers are expected to have called
    /// [`Self::check_reservation`] first under the same request-name lock.
    pub async fn reserve_name(
        &self,
        pool: &str,
        request_name: &str,
        name_prefix: Option<&str>,
        snap_source: Option<&str>,
    ) -> JournalResult<(String, String)> {
        if snap_source.is_some() != self.config.source_key.is_some() {
            return Err(JournalError::SourceUnsupported);
        }

        let dir_key = format!("{}{}", self.config.csi_name_key_prefix, request_name);
        match self
            .store
            .get_keys(
                pool,
                &self.config.namespace,
                &self.config.csi_directory,
                &[dir_key.clone()],
            )
            .await
        {
            Ok(values) if values.contains_key(&dir_key) => {
                return Err(JournalError::ReservationExists {
                    request_name: request_name.to_string(),
                })
            }
            Ok(_) => {}
            Err(OmapError::ObjectNotFound { .. }) | Err(OmapError::PoolNotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        // Claim the UUID first; a crash after this point leaks only the UUID
        // object, which a later check will garbage collect.
        let uuid = self.reserve_uuid(pool).await?;
        let generated = self.generated_name(name_prefix, &uuid);

        let mut dir_pairs = HashMap::new();
        dir_pairs.insert(dir_key, uuid.clone());
        if let Err(err) = self
            .store
            .set_keys(
                pool,
                &self.config.namespace,
                &self.config.csi_directory,
                &dir_pairs,
            )
            .await
        {
            self.cleanup_uuid_object(pool, &uuid).await;

            return Err(err.into());
        }

        let uuid_oid = format!("{}{}", self.config.uuid_directory_prefix, uuid);
        let mut pairs = HashMap::new();
        pairs.insert(self.config.csi_name_key.clone(), request_name.to_string());
        pairs.insert(self.config.csi_image_key.clone(), generated.clone());
        if let (Some(source_key), Some(source)) = (&self.config.source_key, snap_source) {
            pairs.insert(source_key.clone(), source.to_string());
        }
        if let Err(err) = self
            .store
            .set_keys(pool, &self.config.namespace, &uuid_oid, &pairs)
            .await
        {
            warn!(request = %request_name, "reservation failed, undoing");
            if let Err(undo_err) = self
                .undo_reservation(pool, Some(&generated), request_name)
                .await
            {
                warn!(
                    request = %request_name,
                    error = %undo_err,
                    "failed undoing reservation"
                );
            }

            return Err(err.into());
        }

        debug!(
            request = %request_name,
            uuid = %uuid,
            name = %generated,
            "reserved name"
        );

        Ok((uuid, generated))
    }

    /// Removes a reservation, in the reverse order of [`Self::reserve_name`]:
    /// the UUID object first, the directory key last. Idempotent; missing
    /// pieces are not errors.
    ///
    /// The backend object backing the reservation must be cleaned up before
    /// calling this.
    pub async fn undo_reservation(
        &self,
        pool: &str,
        generated_name: Option<&str>,
        request_name: &str,
    ) -> JournalResult<()> {
        if let Some(name) = generated_name {
            let uuid = uuid_suffix(name)?;
            let uuid_oid = format!("{}{}", self.config.uuid_directory_prefix, uuid);
            match self
                .store
                .remove_object(pool, &self.config.namespace, &uuid_oid)
                .await
            {
                Ok(()) | Err(OmapError::ObjectNotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let dir_key = format!("{}{}", self.config.csi_name_key_prefix, request_name);
        match self
            .store
            .remove_keys(
                pool,
                &self.config.namespace,
                &self.config.csi_directory,
                &[dir_key],
            )
            .await
        {
            Ok(()) | Err(OmapError::ObjectNotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        debug!(request = %request_name, "reservation removed");

        Ok(())
    }

    /// Reads the back-pointers of a UUID object. `None` means the object is
    /// missing or lacks required keys, i.e. the reservation is stale.
    async fn image_attributes(
        &self,
        pool: &str,
        uuid: &str,
    ) -> JournalResult<Option<ImageAttributes>> {
        let uuid_oid = format!("{}{}", self.config.uuid_directory_prefix, uuid);
        let mut fetch = vec![
            self.config.csi_name_key.clone(),
            self.config.csi_image_key.clone(),
        ];
        if let Some(source_key) = &self.config.source_key {
            fetch.push(source_key.clone());
        }

        let values = match self
            .store
            .get_keys(pool, &self.config.namespace, &uuid_oid, &fetch)
            .await
        {
            Ok(values) => values,
            Err(OmapError::ObjectNotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let (Some(request_name), Some(image_name)) = (
            values.get(&self.config.csi_name_key),
            values.get(&self.config.csi_image_key),
        ) else {
            return Ok(None);
        };

        let source_name = self
            .config
            .source_key
            .as_ref()
            .and_then(|k| values.get(k).cloned());

        Ok(Some(ImageAttributes {
            request_name: request_name.clone(),
            image_name: image_name.clone(),
            source_name,
        }))
    }

    /// Claims a fresh UUID by exclusively creating its directory object,
    /// retrying on collision.
    async fn reserve_uuid(&self, pool: &str) -> JournalResult<String> {
        for attempt in 1..=MAX_UUID_ATTEMPTS {
            let uuid = Uuid::new_v4().to_string();
            let uuid_oid = format!("{}{}", self.config.uuid_directory_prefix, uuid);
            match self
                .store
                .create_object(pool, &self.config.namespace, &uuid_oid)
                .await
            {
                Ok(()) => return Ok(uuid),
                Err(OmapError::ObjectExists { .. }) => {
                    debug!(
                        uuid = %uuid,
                        attempt,
                        "uuid conflict detected, retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(JournalError::UuidConflictExhausted)
    }

    /// Best-effort removal of a claimed UUID object during reservation
    /// failure handling.
    async fn cleanup_uuid_object(&self, pool: &str, uuid: &str) {
        let uuid_oid = format!("{}{}", self.config.uuid_directory_prefix, uuid);
        if let Err(err) = self
            .store
            .remove_object(pool, &self.config.namespace, &uuid_oid)
            .await
        {
            warn!(uuid = %uuid, error = %err, "failed removing uuid object");
        }
    }
}

/// Extracts the UUID suffix of a generated object name.
fn uuid_suffix(name: &str) -> JournalResult<&str> {
    let suffix = name
        .len()
        .checked_sub(UUID_ENCODED_LEN)
        .and_then(|start| name.get(start..))
        .ok_or_else(|| JournalError::MalformedGeneratedName {
            name: name.to_string(),
        })?;
    if Uuid::parse_str(suffix).is_err() {
        return Err(JournalError::MalformedGeneratedName {
            name: name.to_string(),
        });
    }

    Ok(suffix)
}
