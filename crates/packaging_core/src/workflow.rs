//! The packaging wizard session: plant, containers, proposal and the step machine, driven by
//! operator intents and reconciled with backend responses.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::{
    domain::{ContainerKey, PackageId, PlantId},
    protocol::{Container, MessageLogEntry, PackagingMaterial, Plant, PlantUser, ProposalHeader},
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    bulk::BulkReport,
    busy::BusyGate,
    error::{Action, ValidationError, WorkflowError},
    gateway::{create_entity, read_collection, read_entity, DataGateway, Filter, Resource},
    lifecycle::{
        CreateRequest, ItemsRequest, ProcessField, ProcessRequest, Proposal,
        ProposalLifecycleManager,
    },
    message_log::{has_failure, MessageLogPresenter, Presenter, Severity, NOTICE_TIMEOUT},
    selection::{ContainerSelectionTracker, SelectionFlags},
    side_workflows::{
        ContainerActions, ContainerRefresh, MaterialCatalog, SampleSource, SamplesDialogView,
        DEFAULT_ABANDON_COMMENT,
    },
    steps::{StepController, WizardStep},
};

pub const CREATE_TITLE: &str = "Create Proposal";
pub const CREATE_MESSAGES_TITLE: &str = "Create Proposal Messages";
pub const PROCESS_TITLE: &str = "Processing Results";
pub const UNASSIGN_TITLE: &str = "Unassign Container";
pub const ADD_TITLE: &str = "Add Container";
pub const CREATE_FIRST: &str = "Create the packaging proposal before processing it.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub notice_timeout: Duration,
    pub abandon_comment: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            notice_timeout: NOTICE_TIMEOUT,
            abandon_comment: DEFAULT_ABANDON_COMMENT.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct WorkflowState {
    /// Bumped on every reset; responses carrying an older value are dropped.
    generation: u64,
    plants: Vec<Plant>,
    plant: Option<PlantId>,
    steps: StepController,
    selection: ContainerSelectionTracker,
    proposal: Proposal,
    materials: MaterialCatalog,
}

impl WorkflowState {
    fn ensure_current(&self, generation: u64, action: Action) -> Result<(), WorkflowError> {
        if self.generation == generation {
            return Ok(());
        }
        warn!(
            action = %action,
            started = generation,
            current = self.generation,
            "workflow: discarding response from before reset"
        );
        Err(WorkflowError::Stale(action))
    }

    fn selected_keys(&self) -> Vec<ContainerKey> {
        self.selection.selected().into_iter().map(Container::key).collect()
    }

    /// Drops containers and proposal and starts a new generation; the plant survives.
    fn reset_proposal_cycle(&mut self) {
        self.generation += 1;
        self.selection.reset();
        self.proposal = Proposal::default();
        self.steps.discard_from(WizardStep::ContainerSelection);
    }
}

/// Read-only copy of the session for rendering.
#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub generation: u64,
    pub plants: Vec<Plant>,
    pub plant: Option<PlantId>,
    pub steps: StepController,
    pub containers: Vec<Container>,
    pub accounts: Vec<String>,
    pub account_filter: Option<String>,
    pub selected: Vec<ContainerKey>,
    pub flags: SelectionFlags,
    pub proposal: Proposal,
}

impl WorkflowSnapshot {
    pub fn active_step(&self) -> WizardStep {
        self.steps.active()
    }
}

pub struct PackagingWorkflow {
    gateway: Arc<dyn DataGateway>,
    lifecycle: ProposalLifecycleManager,
    messages: MessageLogPresenter,
    busy: BusyGate,
    actions: ContainerActions,
    inner: Mutex<WorkflowState>,
}

impl PackagingWorkflow {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        presenter: Arc<dyn Presenter>,
        config: WorkflowConfig,
    ) -> Self {
        let messages = MessageLogPresenter::new(presenter);
        let busy = BusyGate::new();
        let actions = ContainerActions::new(
            Arc::clone(&gateway),
            messages.clone(),
            busy.clone(),
            config.notice_timeout,
            config.abandon_comment,
        );
        Self {
            lifecycle: ProposalLifecycleManager::new(Arc::clone(&gateway)),
            gateway,
            messages,
            busy,
            actions,
            inner: Mutex::new(WorkflowState::default()),
        }
    }

    async fn state(&self) -> MutexGuard<'_, WorkflowState> {
        self.inner.lock().await
    }

    async fn generation(&self) -> u64 {
        self.state().await.generation
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let state = self.state().await;
        WorkflowSnapshot {
            generation: state.generation,
            plants: state.plants.clone(),
            plant: state.plant.clone(),
            steps: state.steps.clone(),
            containers: state.selection.visible().cloned().collect(),
            accounts: state.selection.accounts().to_vec(),
            account_filter: state.selection.account_filter().map(str::to_string),
            selected: state.selected_keys(),
            flags: state.selection.flags(),
            proposal: state.proposal.clone(),
        }
    }

    pub fn is_busy(&self, action: Action) -> bool {
        self.busy.is_busy(action)
    }

    pub fn container_actions(&self) -> &ContainerActions {
        &self.actions
    }

    // ---- plant assignment -------------------------------------------------------------

    /// Reads the plant catalog and the user's plant side by side. A failing user-plant read
    /// only means no plant is assigned yet.
    pub async fn load_plants(&self) -> Result<Option<PlantId>, WorkflowError> {
        let _busy = self.busy.enter(Action::LoadPlants)?;
        let generation = self.generation().await;
        let gateway = self.gateway.as_ref();

        let (plants, user) = tokio::join!(
            read_collection::<Plant>(gateway, &Resource::Plants, &[]),
            read_entity::<PlantUser>(gateway, &Resource::CurrentUserPlant),
        );
        let plants = plants.map_err(WorkflowError::gateway(Action::LoadPlants))?;
        let assigned = match user {
            Ok(user) if !user.plant.is_blank() => Some(user.plant),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "plants: user plant unavailable; treating as unassigned");
                None
            }
        };

        let needs_containers = {
            let mut state = self.state().await;
            state.ensure_current(generation, Action::LoadPlants)?;
            info!(
                plants = plants.len(),
                assigned = ?assigned.as_ref().map(PlantId::as_str),
                "plants: loaded"
            );
            state.plants = plants;
            state.plant = assigned.clone();
            state.steps.discard_from(WizardStep::PlantAssignment);
            if assigned.is_some() {
                state.steps.validate(WizardStep::PlantAssignment);
            }
            assigned.is_some() && !state.selection.is_loaded()
        };

        if needs_containers {
            self.load_containers().await?;
        }
        Ok(assigned)
    }

    pub async fn assign_plant(&self, plant: PlantId) -> Result<PlantId, WorkflowError> {
        if plant.is_blank() {
            return Err(ValidationError::MissingPlant.into());
        }
        let _busy = self.busy.enter(Action::AssignPlant)?;
        let generation = self.generation().await;

        let echo: PlantUser = create_entity(
            self.gateway.as_ref(),
            &Resource::PlantUsers,
            &PlantUser::assign_current_user(plant.clone()),
            None,
        )
        .await
        .map_err(WorkflowError::gateway(Action::AssignPlant))?;
        let assigned = if echo.plant.is_blank() {
            plant
        } else {
            echo.plant
        };

        {
            let mut state = self.state().await;
            state.ensure_current(generation, Action::AssignPlant)?;
            state.plant = Some(assigned.clone());
            state.reset_proposal_cycle();
            state.steps.validate(WizardStep::PlantAssignment);
        }
        info!(plant = %assigned, "plants: assigned to current user");
        self.messages
            .toast(&format!("Plant assigned successfully: {assigned}"));

        self.load_containers().await?;
        Ok(assigned)
    }

    // ---- container selection ----------------------------------------------------------

    pub async fn load_containers(&self) -> Result<usize, WorkflowError> {
        let _busy = self.busy.enter(Action::LoadContainers)?;
        let (plant, generation) = {
            let state = self.state().await;
            let plant = state.plant.clone().ok_or(ValidationError::MissingPlant)?;
            (plant, state.generation)
        };

        let containers: Vec<Container> = read_collection(
            self.gateway.as_ref(),
            &Resource::Containers,
            &[Filter::eq("Plant", plant.as_str())],
        )
        .await
        .map_err(WorkflowError::gateway(Action::LoadContainers))?;

        let mut state = self.state().await;
        state.ensure_current(generation, Action::LoadContainers)?;
        let count = containers.len();
        state.selection.replace(containers);
        state.steps.validate(WizardStep::PlantAssignment);
        state.steps.validate(WizardStep::ContainerSelection);
        info!(plant = %plant, count, "containers: loaded");
        Ok(count)
    }

    async fn reload_containers_after(&self, action: Action) {
        if let Err(err) = self.load_containers().await {
            warn!(action = %action, error = %err, "containers: reload failed");
        }
    }

    pub async fn set_account_filter(&self, account: Option<&str>) {
        self.state().await.selection.set_account_filter(account);
    }

    pub async fn select_containers<I>(&self, keys: I) -> SelectionFlags
    where
        I: IntoIterator<Item = ContainerKey>,
    {
        let mut state = self.state().await;
        state.selection.select(keys);
        state.selection.flags()
    }

    pub async fn selection_flags(&self) -> SelectionFlags {
        self.state().await.selection.flags()
    }

    // ---- navigation -------------------------------------------------------------------

    /// Activates `step`. Processing without a package id bounces back to container selection.
    pub async fn go_to_step(&self, step: WizardStep) -> bool {
        let (moved, lazy_load) = {
            let mut state = self.state().await;
            if step == WizardStep::Processing && state.proposal.package_id().is_none() {
                info!("steps: processing requested without a proposal; redirecting");
                state.steps.discard_from(WizardStep::ProposalCreation);
                state.steps.go_to(WizardStep::ContainerSelection);
                drop(state);
                self.messages.toast(CREATE_FIRST);
                return false;
            }
            let moved = state.steps.go_to(step);
            let lazy_load = moved
                && step >= WizardStep::ContainerSelection
                && state.plant.is_some()
                && !state.selection.is_loaded();
            (moved, lazy_load)
        };
        if lazy_load {
            self.reload_containers_after(Action::LoadContainers).await;
        }
        moved
    }

    pub async fn go_to_index(&self, index: usize) -> bool {
        match WizardStep::from_index(index) {
            Some(step) => self.go_to_step(step).await,
            None => self.state().await.steps.go_to_index(index),
        }
    }

    // ---- proposal lifecycle -----------------------------------------------------------

    /// Creates the proposal from the current selection. On an all-clear log the operator is
    /// told the new id; after that notice closes, containers are reloaded and the wizard
    /// advances to processing.
    pub async fn create_proposal(&self) -> Result<PackageId, WorkflowError> {
        let _busy = self.busy.enter(Action::CreateProposal)?;
        let (request, generation) = {
            let state = self.state().await;
            let request =
                CreateRequest::build(&state.selection, state.plant.as_ref(), &state.proposal)?;
            (request, state.generation)
        };
        info!(containers = request.containers().len(), "proposal: creating");

        let outcome = self.lifecycle.create(&request).await?;
        {
            let mut state = self.state().await;
            state.ensure_current(generation, Action::CreateProposal)?;
            if let Some(package_id) = outcome.package_id.clone() {
                state.proposal.assign_package_id(package_id);
                // Created server-side; advancing stays manual.
                state.steps.validate_through(WizardStep::ProposalCreation);
            }
            state.proposal.replace_items(outcome.items.clone());
            state.proposal.messages = outcome.messages.clone();
        }

        let package_id = match outcome.package_id.clone() {
            Some(package_id) if !outcome.has_failure() => package_id,
            _ => {
                warn!(messages = outcome.messages.len(), "proposal: create reported failure");
                self.messages
                    .present(&outcome.messages, CREATE_MESSAGES_TITLE, || ())
                    .await;
                return Err(WorkflowError::BusinessFailure {
                    action: Action::CreateProposal,
                    messages: outcome.messages,
                });
            }
        };

        self.messages
            .notify(
                Severity::Information,
                CREATE_TITLE,
                format!("Packaging proposal {package_id} created."),
            )
            .await;

        self.reload_containers_after(Action::CreateProposal).await;
        let mut state = self.state().await;
        state.ensure_current(generation, Action::CreateProposal)?;
        state.steps.validate_through(WizardStep::ProposalCreation);
        state.steps.go_to(WizardStep::Processing);
        Ok(package_id)
    }

    pub async fn update_form(&self, field: ProcessField, value: impl Into<String>) {
        self.state().await.proposal.form.set(field, value);
    }

    /// Processes the proposal. Only an all-clear log, once dismissed, resets the session for
    /// the next proposal.
    pub async fn process_proposal(&self) -> Result<Vec<MessageLogEntry>, WorkflowError> {
        let _busy = self.busy.enter(Action::ProcessProposal)?;
        let (request, generation) = {
            let mut state = self.state().await;
            let selected = state.selected_keys();
            let request = ProcessRequest::build(&state.proposal, state.plant.as_ref(), &selected)?;
            state.proposal.form.weight_dry_ice = request.weight_dry_ice().to_string();
            (request, state.generation)
        };

        let messages = self.lifecycle.process(&request).await?;
        {
            let mut state = self.state().await;
            state.ensure_current(generation, Action::ProcessProposal)?;
            state.proposal.messages = messages.clone();
        }

        let failed = has_failure(&messages);
        self.messages.present(&messages, PROCESS_TITLE, || ()).await;
        if failed {
            return Err(WorkflowError::BusinessFailure {
                action: Action::ProcessProposal,
                messages,
            });
        }

        self.reset_for_next_proposal().await;
        Ok(messages)
    }

    /// Clears containers and proposal, keeps the plant, and reloads the container list.
    pub async fn reset_for_next_proposal(&self) {
        let reload = {
            let mut state = self.state().await;
            state.reset_proposal_cycle();
            state.steps.validate(WizardStep::ContainerSelection);
            state.steps.go_to(WizardStep::ContainerSelection);
            info!(generation = state.generation, "workflow: reset for next proposal");
            state.plant.is_some()
        };
        if reload {
            self.reload_containers_after(Action::LoadContainers).await;
        }
    }

    /// Selects proposal items by position; returns whether samples can be opened.
    pub async fn select_proposal_items(&self, indices: &[usize]) -> bool {
        let mut state = self.state().await;
        state.proposal.select_items(indices);
        state.proposal.can_open_samples()
    }

    pub async fn unassign_containers(&self) -> Result<(), WorkflowError> {
        let _busy = self.busy.enter(Action::UnassignContainers)?;
        let (request, generation) = {
            let state = self.state().await;
            let keys: Vec<ContainerKey> = state
                .proposal
                .selected_items()
                .into_iter()
                .map(|item| item.key())
                .collect();
            let request = ItemsRequest::build(&state.proposal, state.plant.as_ref(), &keys)?;
            (request, state.generation)
        };
        let messages = self.lifecycle.unassign(&request).await?;
        self.finish_item_change(
            request,
            messages,
            generation,
            Action::UnassignContainers,
            UNASSIGN_TITLE,
        )
        .await
    }

    pub async fn add_containers(&self, keys: Vec<ContainerKey>) -> Result<(), WorkflowError> {
        let _busy = self.busy.enter(Action::AddContainers)?;
        let (request, generation) = {
            let state = self.state().await;
            let request = ItemsRequest::build(&state.proposal, state.plant.as_ref(), &keys)?;
            (request, state.generation)
        };
        let messages = self.lifecycle.add(&request).await?;
        self.finish_item_change(request, messages, generation, Action::AddContainers, ADD_TITLE)
            .await
    }

    async fn finish_item_change(
        &self,
        request: ItemsRequest,
        messages: Vec<MessageLogEntry>,
        generation: u64,
        action: Action,
        title: &str,
    ) -> Result<(), WorkflowError> {
        {
            let mut state = self.state().await;
            state.ensure_current(generation, action)?;
            state.proposal.messages = messages.clone();
        }
        let failed = has_failure(&messages);
        self.messages.present(&messages, title, || ()).await;
        if failed {
            return Err(WorkflowError::BusinessFailure { action, messages });
        }

        let items = self
            .lifecycle
            .refresh_items(request.package_id(), action)
            .await?;
        let mut state = self.state().await;
        state.ensure_current(generation, action)?;
        debug!(action = %action, items = items.len(), "proposal: items refreshed");
        state.proposal.replace_items(items);
        Ok(())
    }

    // ---- proposal list / standalone processing ----------------------------------------

    pub async fn list_proposals(
        &self,
        plant: &PlantId,
    ) -> Result<Vec<ProposalHeader>, WorkflowError> {
        if plant.is_blank() {
            return Err(ValidationError::MissingPlant.into());
        }
        let _busy = self.busy.enter(Action::ListProposals)?;
        self.lifecycle.list(plant).await
    }

    /// Loads a stored proposal into the session and jumps straight to processing.
    pub async fn open_proposal(
        &self,
        package_id: PackageId,
        plant: Option<PlantId>,
    ) -> Result<(), WorkflowError> {
        let _busy = self.busy.enter(Action::OpenProposal)?;
        let plant = plant.filter(|plant| !plant.is_blank());
        let generation = {
            let mut state = self.state().await;
            state.reset_proposal_cycle();
            state.generation
        };

        let opened = self.lifecycle.open(&package_id, plant.as_ref()).await?;

        let mut state = self.state().await;
        state.ensure_current(generation, Action::OpenProposal)?;
        let plant = plant.or_else(|| Some(opened.header.plant.clone()).filter(|p| !p.is_blank()));
        if plant.is_some() {
            state.plant = plant;
        }
        let stored_id = if opened.header.package_id.is_blank() {
            package_id
        } else {
            opened.header.package_id.clone()
        };
        state.proposal.assign_package_id(stored_id);
        state.proposal.form.prefill(&opened.header);
        state.proposal.status = opened.header.status.clone();
        state.proposal.replace_items(opened.items);
        state.steps.validate_through(WizardStep::ProposalCreation);
        state.steps.go_to(WizardStep::Processing);
        info!(
            key = %opened.key,
            fell_back = opened.fell_back,
            "proposal: opened for processing"
        );
        Ok(())
    }

    /// Starts over from container selection with the current plant.
    pub async fn start_new_proposal(&self) {
        self.reset_for_next_proposal().await;
    }

    // ---- samples / abandon ------------------------------------------------------------

    /// Opens the samples of the single selected container, or of the single selected proposal
    /// item while processing.
    pub async fn open_samples(&self) -> Result<usize, WorkflowError> {
        let source = {
            let state = self.state().await;
            if state.steps.active() == WizardStep::Processing {
                let items = state.proposal.selected_items();
                let plant = state.plant.clone().ok_or(ValidationError::MissingPlant)?;
                match items.as_slice() {
                    [item] => SampleSource::from_proposal_item(
                        plant,
                        item.key(),
                        state.proposal.package_id().cloned(),
                    ),
                    _ => return Err(ValidationError::SingleContainerRequired.into()),
                }
            } else {
                match state.selection.selected().as_slice() {
                    [container] => SampleSource::from_container(container),
                    _ => return Err(ValidationError::SingleContainerRequired.into()),
                }
            }
        };
        self.actions.open_samples(source).await
    }

    pub async fn samples_dialog(&self) -> Option<SamplesDialogView> {
        self.actions.samples_dialog().await
    }

    pub async fn close_samples(&self) {
        self.actions.close_samples().await;
    }

    pub async fn pull_sample(&self) -> Result<MessageLogEntry, WorkflowError> {
        self.actions.pull_sample(self).await
    }

    pub async fn abandon_selected(&self) -> Result<BulkReport, WorkflowError> {
        let rows: Vec<Container> = {
            let state = self.state().await;
            state.selection.selected().into_iter().cloned().collect()
        };
        self.actions.abandon(rows, self).await
    }

    // ---- packaging material value help ------------------------------------------------

    pub async fn load_packaging_materials(&self) -> Result<usize, WorkflowError> {
        let _busy = self.busy.enter(Action::LoadMaterials)?;
        let materials: Vec<PackagingMaterial> = read_collection(
            self.gateway.as_ref(),
            &Resource::PackagingMaterials,
            &[],
        )
        .await
        .map_err(WorkflowError::gateway(Action::LoadMaterials))?;
        let count = materials.len();
        self.state().await.materials = MaterialCatalog::new(materials);
        Ok(count)
    }

    pub async fn search_materials(&self, query: &str) -> Vec<PackagingMaterial> {
        self.state().await.materials.search(query)
    }

    pub async fn choose_material(&self, code: &str) {
        let mut state = self.state().await;
        if !state.materials.is_empty() && state.materials.find(code).is_none() {
            debug!(code, "materials: chosen code not in catalog");
        }
        state.proposal.form.set(ProcessField::PackageMaterial, code);
    }
}

#[async_trait]
impl ContainerRefresh for PackagingWorkflow {
    async fn reload_containers(&self) {
        self.reload_containers_after(Action::LoadContainers).await;
    }

    async fn clear_container_selection(&self) {
        self.state().await.selection.clear();
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
