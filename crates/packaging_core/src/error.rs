use std::fmt;

use shared::{domain::ContainerKey, protocol::MessageLogEntry};
use thiserror::Error;

use crate::gateway::GatewayError;

pub const NOT_READY_PREAMBLE: &str = "You can only create a Packaging Proposal when Samples Received equals Container Total for ALL selected containers.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotReadyContainer {
    pub key: ContainerKey,
    pub samples_received: u32,
    pub container_total: u32,
}

impl fmt::Display for NotReadyContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Samples: {} / Total: {})",
            self.key.container_id, self.samples_received, self.container_total
        )
    }
}

fn not_ready_list(containers: &[NotReadyContainer]) -> String {
    containers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rejected before any network call; workflow state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select at least one container before creating the Packaging Proposal.")]
    EmptySelection,
    #[error("{}\n\nNot ready:\n{}", NOT_READY_PREAMBLE, not_ready_list(.0))]
    ContainersNotReady(Vec<NotReadyContainer>),
    #[error("Please select a Plant.")]
    MissingPlant,
    #[error("Package ID is missing.")]
    MissingPackageId,
    #[error("A packaging proposal has already been created; start a new proposal first.")]
    ProposalAlreadyCreated,
    #[error("Gross weight must be greater than zero.")]
    NonPositiveGross,
    #[error("Dry ice weight cannot exceed the gross weight.")]
    DryIceExceedsGross,
    #[error("{field} weight '{value}' is not a number.")]
    InvalidWeight { field: &'static str, value: String },
    #[error("Please select a sample to pull.")]
    MissingSample,
    #[error("Comments are required to pull a sample.")]
    MissingComments,
    #[error("Please select at least one item.")]
    EmptyItemSelection,
    #[error("Please select exactly one container to display its samples.")]
    SingleContainerRequired,
    #[error("Please select at least one container.")]
    NoContainersSelected,
    #[error("No samples dialog is open.")]
    NoSamplesDialog,
}

/// Top-level operations; each one owns a busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    LoadPlants,
    AssignPlant,
    LoadContainers,
    OpenSamples,
    PullSample,
    CreateProposal,
    ProcessProposal,
    UnassignContainers,
    AddContainers,
    AbandonContainers,
    LoadMaterials,
    ListProposals,
    OpenProposal,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::LoadPlants => "load plants",
            Action::AssignPlant => "assign plant",
            Action::LoadContainers => "load containers",
            Action::OpenSamples => "open samples",
            Action::PullSample => "pull sample",
            Action::CreateProposal => "create proposal",
            Action::ProcessProposal => "process proposal",
            Action::UnassignContainers => "unassign containers",
            Action::AddContainers => "add containers",
            Action::AbandonContainers => "abandon containers",
            Action::LoadMaterials => "load packaging materials",
            Action::ListProposals => "list proposals",
            Action::OpenProposal => "open proposal",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{action} failed: {source}")]
    Gateway {
        action: Action,
        #[source]
        source: GatewayError,
    },
    /// The call went through but the backend log carries a failure entry.
    #[error("{action} reported a failure")]
    BusinessFailure {
        action: Action,
        messages: Vec<MessageLogEntry>,
    },
    #[error("{0} is already in progress")]
    Busy(Action),
    /// The workflow was reset while the request was in flight; the response was dropped.
    #[error("{0} response discarded after reset")]
    Stale(Action),
}

impl WorkflowError {
    pub fn gateway(action: Action) -> impl FnOnce(GatewayError) -> Self {
        move |source| WorkflowError::Gateway { action, source }
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            WorkflowError::Validation(err) => Some(err),
            _ => None,
        }
    }
}
