//! Proposal create / process / item changes against the service.
//!
//! Every request type is built through a validating constructor, so nothing reaches the
//! gateway unless it already passed the client-side checks.

use std::{collections::BTreeSet, sync::Arc};

use shared::{
    domain::{ContainerKey, Intent, PackageId, PlantId, DEFAULT_WEIGHT, DEFAULT_WEIGHT_UNIT},
    protocol::{MessageLogEntry, ProposalHeader, ProposalItem, ProposalItemsPayload},
};
use tracing::{info, warn};

use crate::{
    error::{Action, ValidationError, WorkflowError},
    gateway::{
        create_entity, read_collection, read_entity, DataGateway, EntityKey, Filter, GatewayError,
        KeyField, Resource,
    },
    key_resolution::{KeyResolutionStrategy, Resolved},
    message_log::has_failure,
    selection::ContainerSelectionTracker,
};

const BLANK: &str = " ";

/// Editable processing-stage fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessForm {
    pub weight_gross: String,
    pub weight_dry_ice: String,
    pub weight_units: String,
    pub package_material: String,
    pub comments: String,
}

impl Default for ProcessForm {
    fn default() -> Self {
        Self {
            weight_gross: DEFAULT_WEIGHT.to_string(),
            weight_dry_ice: DEFAULT_WEIGHT.to_string(),
            weight_units: DEFAULT_WEIGHT_UNIT.to_string(),
            package_material: String::new(),
            comments: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessField {
    WeightGross,
    WeightDryIce,
    WeightUnits,
    PackageMaterial,
    Comments,
}

impl ProcessForm {
    pub fn set(&mut self, field: ProcessField, value: impl Into<String>) {
        let value = value.into();
        match field {
            ProcessField::WeightGross => self.weight_gross = value,
            ProcessField::WeightDryIce => self.weight_dry_ice = value,
            ProcessField::WeightUnits => self.weight_units = value,
            ProcessField::PackageMaterial => self.package_material = value,
            ProcessField::Comments => self.comments = value,
        }
    }

    /// Copies the non-blank values of a stored header over the current form.
    pub fn prefill(&mut self, header: &ProposalHeader) {
        let fields = [
            (ProcessField::WeightGross, &header.weight_gross),
            (ProcessField::WeightDryIce, &header.weight_dry_ice),
            (ProcessField::WeightUnits, &header.weight_units),
            (ProcessField::PackageMaterial, &header.package_material),
            (ProcessField::Comments, &header.comments),
        ];
        for (field, value) in fields {
            if !value.trim().is_empty() {
                self.set(field, value.trim());
            }
        }
    }
}

/// The proposal being worked on in this session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal {
    package_id: Option<PackageId>,
    pub form: ProcessForm,
    pub status: String,
    items: Vec<ProposalItem>,
    selected_items: BTreeSet<ContainerKey>,
    pub messages: Vec<MessageLogEntry>,
}

impl Proposal {
    pub fn package_id(&self) -> Option<&PackageId> {
        self.package_id.as_ref()
    }

    /// Stores the backend-assigned id. An id already held is never overwritten.
    pub fn assign_package_id(&mut self, package_id: PackageId) -> bool {
        if package_id.is_blank() {
            return false;
        }
        match &self.package_id {
            Some(current) if *current != package_id => {
                warn!(
                    current = %current,
                    incoming = %package_id,
                    "proposal: package id already assigned"
                );
                false
            }
            Some(_) => true,
            None => {
                self.package_id = Some(package_id);
                true
            }
        }
    }

    pub fn items(&self) -> &[ProposalItem] {
        &self.items
    }

    /// Replaces the item list; the processing-stage selection starts over.
    pub fn replace_items(&mut self, items: Vec<ProposalItem>) {
        self.items = items;
        self.selected_items.clear();
    }

    /// Selects items by position; out-of-range indices are ignored.
    pub fn select_items(&mut self, indices: &[usize]) {
        self.selected_items = indices
            .iter()
            .filter_map(|idx| self.items.get(*idx))
            .map(ProposalItem::key)
            .collect();
    }

    pub fn selected_items(&self) -> Vec<&ProposalItem> {
        self.items
            .iter()
            .filter(|item| self.selected_items.contains(&item.key()))
            .collect()
    }

    pub fn can_open_samples(&self) -> bool {
        self.selected_items.len() == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    plant: PlantId,
    containers: Vec<ContainerKey>,
}

impl CreateRequest {
    pub fn build(
        selection: &ContainerSelectionTracker,
        plant: Option<&PlantId>,
        proposal: &Proposal,
    ) -> Result<Self, ValidationError> {
        if selection.count() == 0 {
            return Err(ValidationError::EmptySelection);
        }
        let not_ready = selection.not_ready();
        if !not_ready.is_empty() {
            return Err(ValidationError::ContainersNotReady(not_ready));
        }
        let plant = plant
            .filter(|plant| !plant.is_blank())
            .ok_or(ValidationError::MissingPlant)?;
        if proposal.package_id().is_some() {
            return Err(ValidationError::ProposalAlreadyCreated);
        }
        Ok(Self {
            plant: plant.clone(),
            containers: selection.selected().into_iter().map(|c| c.key()).collect(),
        })
    }

    pub fn containers(&self) -> &[ContainerKey] {
        &self.containers
    }

    fn header(&self) -> ProposalHeader {
        let items = self
            .containers
            .iter()
            .cloned()
            .map(|key| ProposalItem::new(PackageId::default(), key))
            .collect();
        ProposalHeader::draft(self.plant.clone(), items)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub package_id: Option<PackageId>,
    pub items: Vec<ProposalItem>,
    pub messages: Vec<MessageLogEntry>,
}

impl CreateOutcome {
    pub fn has_failure(&self) -> bool {
        has_failure(&self.messages)
    }
}

fn parse_weight(field: &'static str, raw: &str) -> Result<f64, ValidationError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ValidationError::InvalidWeight {
            field,
            value: raw.to_string(),
        })
}

fn blank_as_space(value: &str) -> String {
    if value.trim().is_empty() {
        BLANK.to_string()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    header: ProposalHeader,
}

impl ProcessRequest {
    /// Falls back to `selected_containers` when the proposal holds no items.
    pub fn build(
        proposal: &Proposal,
        plant: Option<&PlantId>,
        selected_containers: &[ContainerKey],
    ) -> Result<Self, ValidationError> {
        let package_id = proposal
            .package_id()
            .cloned()
            .ok_or(ValidationError::MissingPackageId)?;
        let form = &proposal.form;

        let gross_raw = form.weight_gross.trim();
        if gross_raw.is_empty() {
            return Err(ValidationError::NonPositiveGross);
        }
        let gross = parse_weight("Gross", gross_raw)?;
        if gross <= 0.0 {
            return Err(ValidationError::NonPositiveGross);
        }
        let dry_ice_raw = match form.weight_dry_ice.trim() {
            "" => DEFAULT_WEIGHT,
            raw => raw,
        };
        if parse_weight("Dry ice", dry_ice_raw)? > gross {
            return Err(ValidationError::DryIceExceedsGross);
        }

        let items: Vec<ProposalItem> = if proposal.items().is_empty() {
            selected_containers
                .iter()
                .cloned()
                .map(|key| ProposalItem::new(package_id.clone(), key))
                .collect()
        } else {
            proposal
                .items()
                .iter()
                .map(|item| ProposalItem::new(package_id.clone(), item.key()))
                .collect()
        };

        let mut header = ProposalHeader::draft(plant.cloned().unwrap_or_default(), items);
        header.package_id = package_id;
        header.weight_gross = gross_raw.to_string();
        header.weight_dry_ice = dry_ice_raw.to_string();
        header.weight_units = form.weight_units.trim().to_string();
        header.comments = blank_as_space(&form.comments);
        header.package_material = blank_as_space(&form.package_material);
        Ok(Self { header })
    }

    /// Dry-ice weight as sent; a blank entry becomes `0.000`.
    pub fn weight_dry_ice(&self) -> &str {
        &self.header.weight_dry_ice
    }

    pub fn items(&self) -> &[ProposalItem] {
        &self.header.items
    }
}

/// Add or unassign containers on an existing proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemsRequest {
    payload: ProposalItemsPayload,
}

impl ItemsRequest {
    pub fn build(
        proposal: &Proposal,
        plant: Option<&PlantId>,
        items: &[ContainerKey],
    ) -> Result<Self, ValidationError> {
        let package_id = proposal
            .package_id()
            .cloned()
            .ok_or(ValidationError::MissingPackageId)?;
        if items.is_empty() {
            return Err(ValidationError::EmptyItemSelection);
        }
        Ok(Self {
            payload: ProposalItemsPayload {
                items: items
                    .iter()
                    .cloned()
                    .map(|key| ProposalItem::new(package_id.clone(), key))
                    .collect(),
                package_id,
                plant: plant.cloned().unwrap_or_default(),
                messages: Vec::new(),
            },
        })
    }

    pub fn package_id(&self) -> &PackageId {
        &self.payload.package_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenedProposal {
    pub header: ProposalHeader,
    pub items: Vec<ProposalItem>,
    pub key: EntityKey,
    pub fell_back: bool,
}

pub struct ProposalLifecycleManager {
    gateway: Arc<dyn DataGateway>,
}

impl ProposalLifecycleManager {
    pub fn new(gateway: Arc<dyn DataGateway>) -> Self {
        Self { gateway }
    }

    pub async fn create(&self, request: &CreateRequest) -> Result<CreateOutcome, WorkflowError> {
        let header = request.header();
        let response: ProposalHeader = create_entity(
            self.gateway.as_ref(),
            &Resource::ProposalHeaders,
            &header,
            Some(Intent::CreatePackagingProposal),
        )
        .await
        .map_err(WorkflowError::gateway(Action::CreateProposal))?;

        let package_id = Some(response.package_id).filter(|id| !id.is_blank());
        let items = if response.items.is_empty() {
            header.items
        } else {
            response.items
        };
        info!(
            package_id = ?package_id.as_ref().map(PackageId::as_str),
            items = items.len(),
            messages = response.messages.len(),
            "proposal: create returned"
        );
        Ok(CreateOutcome {
            package_id,
            items,
            messages: response.messages,
        })
    }

    /// Returns the backend message log; failure entries are the caller's to interpret.
    pub async fn process(
        &self,
        request: &ProcessRequest,
    ) -> Result<Vec<MessageLogEntry>, WorkflowError> {
        let response: ProposalHeader = create_entity(
            self.gateway.as_ref(),
            &Resource::ProposalHeaders,
            &request.header,
            Some(Intent::ProcessPackagingProposal),
        )
        .await
        .map_err(WorkflowError::gateway(Action::ProcessProposal))?;
        info!(
            package_id = %request.header.package_id,
            messages = response.messages.len(),
            "proposal: process returned"
        );
        Ok(response.messages)
    }

    pub async fn unassign(
        &self,
        request: &ItemsRequest,
    ) -> Result<Vec<MessageLogEntry>, WorkflowError> {
        self.change_items(request, Intent::UnassignContainer, Action::UnassignContainers)
            .await
    }

    pub async fn add(&self, request: &ItemsRequest) -> Result<Vec<MessageLogEntry>, WorkflowError> {
        self.change_items(request, Intent::AddContainer, Action::AddContainers)
            .await
    }

    async fn change_items(
        &self,
        request: &ItemsRequest,
        intent: Intent,
        action: Action,
    ) -> Result<Vec<MessageLogEntry>, WorkflowError> {
        let response: ProposalHeader = create_entity(
            self.gateway.as_ref(),
            &Resource::ProposalHeaders,
            &request.payload,
            Some(intent),
        )
        .await
        .map_err(WorkflowError::gateway(action))?;
        info!(
            package_id = %request.payload.package_id,
            %intent,
            items = request.payload.items.len(),
            "proposal: item change returned"
        );
        Ok(response.messages)
    }

    pub async fn refresh_items(
        &self,
        package_id: &PackageId,
        action: Action,
    ) -> Result<Vec<ProposalItem>, WorkflowError> {
        read_collection(
            self.gateway.as_ref(),
            &Resource::ProposalItems(EntityKey::package(package_id)),
            &[],
        )
        .await
        .map_err(WorkflowError::gateway(action))
    }

    pub async fn list(&self, plant: &PlantId) -> Result<Vec<ProposalHeader>, WorkflowError> {
        read_collection(
            self.gateway.as_ref(),
            &Resource::ProposalHeaders,
            &[Filter::eq("Plant", plant.as_str())],
        )
        .await
        .map_err(WorkflowError::gateway(Action::ListProposals))
    }

    /// Reads header and items under `(PackageId, Plant)`, falling back to `PackageId` alone.
    pub async fn open(
        &self,
        package_id: &PackageId,
        plant: Option<&PlantId>,
    ) -> Result<OpenedProposal, WorkflowError> {
        if package_id.is_blank() {
            return Err(ValidationError::MissingPackageId.into());
        }
        let strategy = KeyResolutionStrategy::new(
            KeyField::new("PackageId", package_id.as_str()),
            plant.map(|plant| KeyField::new("Plant", plant.as_str())),
        );
        let gateway = self.gateway.as_ref();
        let Resolved {
            value: (header, items),
            key,
            fell_back,
        } = strategy
            .resolve(|key| async move {
                let header: ProposalHeader =
                    read_entity(gateway, &Resource::ProposalHeader(key.clone())).await?;
                let items: Vec<ProposalItem> =
                    read_collection(gateway, &Resource::ProposalItems(key), &[]).await?;
                Ok::<_, GatewayError>((header, items))
            })
            .await
            .map_err(WorkflowError::gateway(Action::OpenProposal))?;

        Ok(OpenedProposal {
            header,
            items,
            key,
            fell_back,
        })
    }
}

#[cfg(test)]
#[path = "tests/lifecycle_tests.rs"]
mod tests;
