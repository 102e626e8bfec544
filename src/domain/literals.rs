//! Canonical literals
//!
//! Annotation keys, labels, the finalizer token and event reasons shared by
//! the provisioning and deletion workflows. Nothing else in the crate spells
//! these strings out.

// =============================================================================
// Claim Annotations
// =============================================================================

/// Operator-supplied share name, used instead of `{namespace}-{name}`
pub const SHARE_OVERRIDE_ANNOTATION: &str = "kliggo.ch/share-override";

/// Share name computed by the provisioner on first success
pub const SHARE_NAME_ANNOTATION: &str = "kliggo.ch/share-name";

/// When set to [`RETAIN_SHARE_VALUE`], deletion keeps the remote share
pub const RETAIN_SHARE_ANNOTATION: &str = "kliggo.ch/retain-share";

/// The only value of [`RETAIN_SHARE_ANNOTATION`] that retains the share
pub const RETAIN_SHARE_VALUE: &str = "true";

// =============================================================================
// Finalizer / Provisioner
// =============================================================================

/// Finalizer gating physical removal of a claim until cleanup is done
pub const FINALIZER: &str = "kliggo.ch/azurefile-provisioner";

/// StorageClass provisioner this controller serves by default
pub const DEFAULT_PROVISIONER: &str = "ylabs.ch/azurefile-share-provisioner";

/// CSI driver that mounts the bound share
pub const AZURE_FILE_CSI_DRIVER: &str = "file.csi.azure.com";

// =============================================================================
// PersistentVolume Labels / Annotations / Attributes
// =============================================================================

pub const PV_LABEL_CLAIM_NAMESPACE: &str = "azurefile.yourlab.dev/pvc-namespace";
pub const PV_LABEL_CLAIM_NAME: &str = "azurefile.yourlab.dev/pvc-name";
pub const PV_LABEL_SHARE_NAME: &str = "azurefile.yourlab.dev/share-name";
pub const PV_ANNOTATION_VOLUME_HANDLE: &str = "azurefile.yourlab.dev/volume-handle";

pub const ATTR_RESOURCE_GROUP: &str = "resourceGroup";
pub const ATTR_STORAGE_ACCOUNT: &str = "storageAccount";
pub const ATTR_SHARE_NAME: &str = "shareName";
pub const ATTR_SERVER: &str = "server";

/// Resource key for storage requests and capacity
pub const STORAGE_RESOURCE: &str = "storage";

/// Fixed reclaim policy of every PersistentVolume this controller builds
pub const RECLAIM_POLICY_DELETE: &str = "Delete";

// =============================================================================
// Event Reasons
// =============================================================================

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    pub const SHARE_ENSURING: &str = "ShareEnsuring";
    pub const SHARE_READY: &str = "ShareReady";
    pub const SHARE_ERROR: &str = "ShareError";
    pub const SHARE_VALIDATION: &str = "ShareValidationError";
    pub const SHARE_NAME_INVALID: &str = "ShareNameInvalid";
    pub const PVC_INVALID: &str = "PVCInvalid";
    pub const PV_BUILD_ERROR: &str = "PVBuildError";
    pub const PV_CREATED: &str = "PVCreated";
    pub const PV_ALREADY_EXISTS: &str = "PVAlreadyExists";
    pub const PV_MISMATCH: &str = "PVMismatch";
    pub const CLEANUP_STARTED: &str = "CleanupStarted";
    pub const SHARE_DELETED: &str = "ShareDeleted";
    pub const SHARE_RETAINED: &str = "ShareRetained";
    pub const CLEANUP_COMPLETE: &str = "CleanupComplete";
}

/// Well-known event action strings.
pub mod actions {
    /// Share and binding provisioning
    pub const PROVISION: &str = "Provision";
    /// Cleanup on claim deletion
    pub const DELETE: &str = "Delete";
}
