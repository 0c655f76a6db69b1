//! Container-level actions shared by the wizard and the standalone processing view:
//! the samples dialog with sample pull, bulk abandon, and the packaging material value help.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{ContainerKey, Intent, PackageId, PlantId, SampleId, PROPOSAL_STATUS_CREATED},
    protocol::{
        Container, ContainerHeaderPayload, ContainerItemPayload, MessageLogEntry,
        PackagingMaterial, Sample,
    },
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    bulk::{Aggregate, BulkOperationAggregator, BulkReport, FallbackTexts},
    busy::BusyGate,
    error::{Action, ValidationError, WorkflowError},
    gateway::{create_entity, read_collection, DataGateway, EntityKey, Resource},
    message_log::{MessageLogPresenter, Severity, TransientNotice, TransientState},
};

pub const DEFAULT_ABANDON_COMMENT: &str = "Abandoned via UI";
pub const ABANDON_TITLE: &str = "Abandon Container";
pub const ABANDON_PARTIAL_TITLE: &str = "Abandon Container (Partial)";
pub const NO_SAMPLES: &str = "No samples found for this container.";
pub const SAMPLE_PULLED: &str = "Sample pulled.";
pub const PULL_FAILED: &str = "Pull Sample failed.";

const ABANDON_TEXTS: FallbackTexts = FallbackTexts {
    success: "Abandon succeeded.",
    failure: "Abandon completed with warnings.",
};

/// Host hooks invoked after container-changing side actions. Hosts without a container list
/// keep the no-op defaults.
#[async_trait]
pub trait ContainerRefresh: Send + Sync {
    async fn reload_containers(&self) {}

    async fn clear_container_selection(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoContainerRefresh;

impl ContainerRefresh for NoContainerRefresh {}

/// Header values of the container a samples dialog was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSource {
    pub account_name: String,
    pub plant: PlantId,
    pub key: ContainerKey,
    pub status: String,
    pub package_id: Option<PackageId>,
}

impl SampleSource {
    pub fn from_container(container: &Container) -> Self {
        Self {
            account_name: container.account_name.clone(),
            plant: container.plant.clone(),
            key: container.key(),
            status: container.status.clone(),
            package_id: container.package_id.clone(),
        }
    }

    /// A proposal item only carries its key; the rest comes from the proposal.
    pub fn from_proposal_item(
        plant: PlantId,
        key: ContainerKey,
        package_id: Option<PackageId>,
    ) -> Self {
        Self {
            account_name: String::new(),
            plant,
            key,
            status: PROPOSAL_STATUS_CREATED.to_string(),
            package_id,
        }
    }

    fn pull_payload(&self, sample_id: SampleId, comments: &str) -> ContainerHeaderPayload {
        let status = match self.status.trim() {
            "" => PROPOSAL_STATUS_CREATED.to_string(),
            status => status.to_string(),
        };
        ContainerHeaderPayload {
            account_name: self.account_name.clone(),
            plant: self.plant.clone(),
            container_id: self.key.container_id.clone(),
            container_instance_id: self.key.container_instance_id.clone(),
            status: Some(status),
            package_id: Some(
                self.package_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ),
            comments: comments.to_string(),
            items: vec![ContainerItemPayload {
                plant: None,
                container_id: self.key.container_id.clone(),
                container_instance_id: self.key.container_instance_id.clone(),
                sample_id: Some(sample_id),
                sample_pull: Some(true),
                comments: comments.to_string(),
            }],
        }
    }
}

fn abandon_payload(container: &Container, comments: &str) -> ContainerHeaderPayload {
    ContainerHeaderPayload {
        account_name: container.account_name.clone(),
        plant: container.plant.clone(),
        container_id: container.container_id.clone(),
        container_instance_id: container.container_instance_id.clone(),
        status: None,
        package_id: None,
        comments: comments.to_string(),
        items: vec![ContainerItemPayload {
            plant: Some(container.plant.clone()),
            container_id: container.container_id.clone(),
            container_instance_id: container.container_instance_id.clone(),
            sample_id: None,
            sample_pull: None,
            comments: String::new(),
        }],
    }
}

/// Samples of one container plus the pull form. Built on open, dropped on close; dropping it
/// cancels the pending auto-dismiss of its inline message.
pub struct SamplesDialog {
    id: u64,
    source: SampleSource,
    samples: Vec<Sample>,
    selected: Option<SampleId>,
    comments: String,
    message: TransientNotice,
}

impl SamplesDialog {
    fn new(id: u64, source: SampleSource, samples: Vec<Sample>, timeout: Duration) -> Self {
        Self {
            id,
            source,
            samples,
            selected: None,
            comments: String::new(),
            message: TransientNotice::new(timeout),
        }
    }

    fn view(&self) -> SamplesDialogView {
        SamplesDialogView {
            title: format!("Samples in {}", self.source.key.container_id),
            source: self.source.clone(),
            samples: self.samples.clone(),
            selected: self.selected.clone(),
            comments: self.comments.clone(),
            message: self.message.snapshot(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplesDialogView {
    pub title: String,
    pub source: SampleSource,
    pub samples: Vec<Sample>,
    pub selected: Option<SampleId>,
    pub comments: String,
    pub message: TransientState,
}

pub struct ContainerActions {
    gateway: Arc<dyn DataGateway>,
    messages: MessageLogPresenter,
    busy: BusyGate,
    notice_timeout: Duration,
    abandon_comment: String,
    dialog: Mutex<Option<SamplesDialog>>,
    next_dialog: AtomicU64,
}

impl ContainerActions {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        messages: MessageLogPresenter,
        busy: BusyGate,
        notice_timeout: Duration,
        abandon_comment: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            messages,
            busy,
            notice_timeout,
            abandon_comment: abandon_comment.into(),
            dialog: Mutex::new(None),
            next_dialog: AtomicU64::new(1),
        }
    }

    /// Reads the samples of `source` and opens the dialog. An empty list opens nothing and
    /// returns `Ok(0)`.
    pub async fn open_samples(&self, source: SampleSource) -> Result<usize, WorkflowError> {
        let _busy = self.busy.enter(Action::OpenSamples)?;
        let resource = Resource::ContainerSamples(EntityKey::container(&source.plant, &source.key));
        let samples: Vec<Sample> = read_collection(self.gateway.as_ref(), &resource, &[])
            .await
            .map_err(WorkflowError::gateway(Action::OpenSamples))?;

        if samples.is_empty() {
            info!(container = %source.key, "samples: none found");
            self.messages.toast(NO_SAMPLES);
            return Ok(0);
        }

        let count = samples.len();
        let id = self.next_dialog.fetch_add(1, Ordering::SeqCst);
        info!(container = %source.key, count, dialog = id, "samples: dialog opened");
        *self.dialog.lock().await = Some(SamplesDialog::new(
            id,
            source,
            samples,
            self.notice_timeout,
        ));
        Ok(count)
    }

    pub async fn close_samples(&self) {
        if let Some(dialog) = self.dialog.lock().await.take() {
            debug!(dialog = dialog.id, "samples: dialog closed");
        }
    }

    pub async fn samples_dialog(&self) -> Option<SamplesDialogView> {
        self.dialog.lock().await.as_ref().map(SamplesDialog::view)
    }

    /// Selects a listed sample; unknown ids clear the selection.
    pub async fn select_sample(&self, sample_id: &SampleId) -> Result<bool, WorkflowError> {
        let mut guard = self.dialog.lock().await;
        let dialog = guard.as_mut().ok_or(ValidationError::NoSamplesDialog)?;
        let known = dialog.samples.iter().any(|s| s.sample_id == *sample_id);
        dialog.selected = known.then(|| sample_id.clone());
        Ok(known)
    }

    pub async fn set_pull_comments(&self, comments: impl Into<String>) -> Result<(), WorkflowError> {
        let mut guard = self.dialog.lock().await;
        let dialog = guard.as_mut().ok_or(ValidationError::NoSamplesDialog)?;
        dialog.comments = comments.into();
        Ok(())
    }

    pub async fn dismiss_samples_message(&self) {
        if let Some(dialog) = self.dialog.lock().await.as_ref() {
            dialog.message.dismiss();
        }
    }

    /// Pulls the selected sample. Every outcome is shown as the dialog's transient message.
    pub async fn pull_sample(
        &self,
        refresh: &dyn ContainerRefresh,
    ) -> Result<MessageLogEntry, WorkflowError> {
        let _busy = self.busy.enter(Action::PullSample)?;
        let (dialog_id, sample_id, payload) = {
            let guard = self.dialog.lock().await;
            let dialog = guard.as_ref().ok_or(ValidationError::NoSamplesDialog)?;
            let Some(sample_id) = dialog.selected.clone() else {
                dialog
                    .message
                    .show(Severity::Warning, ValidationError::MissingSample.to_string());
                return Err(ValidationError::MissingSample.into());
            };
            let comments = dialog.comments.trim();
            if comments.is_empty() {
                dialog
                    .message
                    .show(Severity::Error, ValidationError::MissingComments.to_string());
                return Err(ValidationError::MissingComments.into());
            }
            let payload = dialog.source.pull_payload(sample_id.clone(), comments);
            (dialog.id, sample_id, payload)
        };

        let result: Result<MessageLogEntry, _> = create_entity(
            self.gateway.as_ref(),
            &Resource::Containers,
            &payload,
            Some(Intent::PullSamples),
        )
        .await;

        let mut guard = self.dialog.lock().await;
        let dialog = match guard.as_mut() {
            Some(dialog) if dialog.id == dialog_id => dialog,
            _ => {
                warn!(dialog = dialog_id, "samples: pull response arrived after dialog closed");
                return Err(WorkflowError::Stale(Action::PullSample));
            }
        };

        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(sample = %sample_id, error = %err, "samples: pull request failed");
                dialog.message.show(Severity::Error, PULL_FAILED);
                return Err(WorkflowError::Gateway {
                    action: Action::PullSample,
                    source: err,
                });
            }
        };

        let succeeded = entry.is_success();
        let text = match entry.message.trim() {
            "" if succeeded => SAMPLE_PULLED,
            "" => PULL_FAILED,
            text => text,
        };
        let severity = if succeeded {
            Severity::Success
        } else {
            Severity::Error
        };
        dialog.message.show(severity, text);

        if !succeeded {
            return Err(WorkflowError::BusinessFailure {
                action: Action::PullSample,
                messages: vec![entry],
            });
        }

        dialog.samples.retain(|s| s.sample_id != sample_id);
        dialog.selected = None;
        dialog.comments.clear();
        drop(guard);
        info!(sample = %sample_id, "samples: sample pulled");

        refresh.reload_containers().await;
        Ok(entry)
    }

    /// One `ABANDON_CONTAINER` create per row, all settled before anything is reported.
    pub async fn abandon(
        &self,
        rows: Vec<Container>,
        refresh: &dyn ContainerRefresh,
    ) -> Result<BulkReport, WorkflowError> {
        if rows.is_empty() {
            return Err(ValidationError::NoContainersSelected.into());
        }
        let _busy = self.busy.enter(Action::AbandonContainers)?;
        info!(rows = rows.len(), "abandon: starting");

        let gateway = self.gateway.as_ref();
        let comment = self.abandon_comment.as_str();
        let report = BulkOperationAggregator
            .run(
                rows,
                |row| row.key().to_string(),
                |row| async move {
                    create_entity::<_, MessageLogEntry>(
                        gateway,
                        &Resource::Containers,
                        &abandon_payload(&row, comment),
                        Some(Intent::AbandonContainer),
                    )
                    .await
                },
            )
            .await;

        if report.any_succeeded() {
            refresh.reload_containers().await;
            refresh.clear_container_selection().await;
        }

        let (severity, title) = match report.aggregate() {
            Aggregate::AllSuccess => (Severity::Success, ABANDON_TITLE),
            Aggregate::AllFailure => (Severity::Error, ABANDON_TITLE),
            Aggregate::Partial => (Severity::Warning, ABANDON_PARTIAL_TITLE),
        };
        self.messages
            .notify(severity, title, report.summary(ABANDON_TEXTS))
            .await;
        Ok(report)
    }
}

/// Packaging material value help.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialCatalog {
    materials: Vec<PackagingMaterial>,
}

impl MaterialCatalog {
    pub fn new(materials: Vec<PackagingMaterial>) -> Self {
        Self { materials }
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn materials(&self) -> &[PackagingMaterial] {
        &self.materials
    }

    /// Case-insensitive substring match on code or description; a blank query matches all.
    pub fn search(&self, query: &str) -> Vec<PackagingMaterial> {
        let needle = query.trim().to_lowercase();
        self.materials
            .iter()
            .filter(|m| {
                needle.is_empty()
                    || m.code.to_lowercase().contains(&needle)
                    || m.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    pub fn find(&self, code: &str) -> Option<&PackagingMaterial> {
        self.materials.iter().find(|m| m.code == code)
    }
}

#[cfg(test)]
#[path = "tests/side_workflows_tests.rs"]
mod tests;
