//! Shared fixtures for the workflow tests

#![allow(dead_code)]

use azurefile_share_provisioner::domain::literals::DEFAULT_PROVISIONER;
use azurefile_share_provisioner::{
    ClaimKey, Context, MemoryShareService, MemoryStore, OutcomeRecorder, ProvisionerConfig,
    ReconcileMetrics, ReconcileOutcome, Reconciler, RecordingEventPublisher, Result,
    ShareServiceRef,
};
use k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const CLASS: &str = "azurefile";
pub const NAMESPACE: &str = "team";
pub const NAME: &str = "data";

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub shares: Arc<MemoryShareService>,
    pub events: Arc<RecordingEventPublisher>,
    pub metrics: ReconcileMetrics,
    pub shutdown: CancellationToken,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ProvisionerConfig::new("rg", "account"))
    }

    pub fn with_config(config: ProvisionerConfig) -> Self {
        let shares = Arc::new(MemoryShareService::new());
        Self::build(config, shares.clone(), shares)
    }

    /// Harness whose reconciler talks to `service` instead of the fake
    pub fn with_share_service(config: ProvisionerConfig, service: ShareServiceRef) -> Self {
        Self::build(config, Arc::new(MemoryShareService::new()), service)
    }

    fn build(
        config: ProvisionerConfig,
        shares: Arc<MemoryShareService>,
        service: ShareServiceRef,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_storage_class(storage_class(CLASS, DEFAULT_PROVISIONER));

        let events = Arc::new(RecordingEventPublisher::new());
        let metrics = ReconcileMetrics::new().expect("metrics");
        let shutdown = CancellationToken::new();

        let ctx = Context {
            store: store.clone(),
            shares: service,
            events: events.clone(),
            config,
        };
        let reconciler = Reconciler::new(
            ctx,
            OutcomeRecorder::new(Some(metrics.clone())),
            shutdown.clone(),
        );

        Self {
            store,
            shares,
            events,
            metrics,
            shutdown,
            reconciler,
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        self.reconciler.reconcile(&key()).await
    }

    pub fn claim(&self) -> Option<PersistentVolumeClaim> {
        self.store.claim(&key())
    }

    pub fn only_volume(&self) -> PersistentVolume {
        let volumes = self.store.volumes();
        assert_eq!(volumes.len(), 1, "expected exactly one volume");
        volumes.into_iter().next().expect("one volume")
    }
}

pub fn key() -> ClaimKey {
    ClaimKey::new(NAMESPACE, NAME)
}

pub fn storage_class(name: &str, provisioner: &str) -> StorageClass {
    let mut class = StorageClass::default();
    class.metadata.name = Some(name.to_string());
    class.provisioner = provisioner.to_string();
    class
}

/// Managed claim requesting `storage`
pub fn claim(storage: Option<&str>) -> PersistentVolumeClaim {
    let mut claim = PersistentVolumeClaim::default();
    claim.metadata.namespace = Some(NAMESPACE.to_string());
    claim.metadata.name = Some(NAME.to_string());
    claim.metadata.uid = Some("uid-1".to_string());
    claim.spec = Some(PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteMany".to_string()]),
        storage_class_name: Some(CLASS.to_string()),
        resources: Some(VolumeResourceRequirements {
            requests: storage.map(|s| {
                BTreeMap::from([("storage".to_string(), Quantity(s.to_string()))])
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    claim
}

pub fn with_annotation(mut claim: PersistentVolumeClaim, key: &str, value: &str) -> PersistentVolumeClaim {
    claim
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    claim
}

pub fn with_class(mut claim: PersistentVolumeClaim, class: Option<&str>) -> PersistentVolumeClaim {
    if let Some(spec) = claim.spec.as_mut() {
        spec.storage_class_name = class.map(str::to_string);
    }
    claim
}
