use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(PlantId);
id_newtype!(ContainerId);
id_newtype!(ContainerInstanceId);
id_newtype!(SampleId);
id_newtype!(PackageId);

/// Identifies one fill cycle of a physical container within a plant's collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerKey {
    pub container_id: ContainerId,
    pub container_instance_id: ContainerInstanceId,
}

impl ContainerKey {
    pub fn new(
        container_id: impl Into<ContainerId>,
        container_instance_id: impl Into<ContainerInstanceId>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            container_instance_id: container_instance_id.into(),
        }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_id, self.container_instance_id)
    }
}

/// Server-side business action selected on the overloaded header endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    CreatePackagingProposal,
    AddContainer,
    UnassignContainer,
    AbandonContainer,
    ProcessPackagingProposal,
    PullSamples,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::CreatePackagingProposal => "CREATE_PACKAGING_PROPOSAL",
            Intent::AddContainer => "ADD_CONTAINER",
            Intent::UnassignContainer => "UNASSIGN_CONTAINER",
            Intent::AbandonContainer => "ABANDON_CONTAINER",
            Intent::ProcessPackagingProposal => "PROCESS_PACKAGING_PROPOSAL",
            Intent::PullSamples => "PULL_SAMPLES",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Success,
    Failure,
    Other,
}

impl MessageKind {
    pub fn classify(raw: &str) -> Self {
        let normalized = raw.trim();
        if normalized.eq_ignore_ascii_case("success") {
            MessageKind::Success
        } else if normalized.eq_ignore_ascii_case("failure") {
            MessageKind::Failure
        } else {
            MessageKind::Other
        }
    }
}

/// Proposal status code for a freshly created proposal; the only status that can be processed.
pub const PROPOSAL_STATUS_CREATED: &str = "01";

pub const DEFAULT_WEIGHT: &str = "0.000";
pub const DEFAULT_WEIGHT_UNIT: &str = "LB";
