//! Wire entities of the packaging service (OData v2 JSON, PascalCase properties).
//!
//! Field-name drift on the backend is absorbed here with serde aliases so the rest of the
//! workspace only ever sees one normalized name per concept.

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    ContainerId, ContainerInstanceId, ContainerKey, MessageKind, PackageId, PlantId, SampleId,
    DEFAULT_WEIGHT, PROPOSAL_STATUS_CREATED,
};

/// Key value the backend resolves to the signed-in user.
pub const CURRENT_USER: &str = "CURRENT_USER";

/// Accepts a nested collection in any of the shapes the service emits:
/// a bare array, `{"results": [..]}`, an unexpanded `{"__deferred": ..}` link, or null.
pub mod results {
    use serde::{de::IgnoredAny, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<T> {
        Plain(Vec<T>),
        Wrapped {
            results: Vec<T>,
        },
        Deferred {
            #[serde(rename = "__deferred")]
            _deferred: IgnoredAny,
        },
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(match Option::<Repr<T>>::deserialize(deserializer)? {
            Some(Repr::Plain(items)) | Some(Repr::Wrapped { results: items }) => items,
            Some(Repr::Deferred { .. }) | None => Vec::new(),
        })
    }
}

/// Top-level collection read from the service.
#[derive(Debug, Clone, PartialEq)]
pub struct Results<T>(pub Vec<T>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Results<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        results::deserialize(deserializer).map(Results)
    }
}

mod lenient_count {
    use serde::{de, Deserialize, Deserializer};
    use serde_json::Value;

    fn from_f64<E: de::Error>(raw: f64) -> Result<u32, E> {
        if raw < 0.0 || raw.fract() != 0.0 || raw > f64::from(u32::MAX) {
            return Err(E::custom(format!("invalid sample count {raw}")));
        }
        Ok(raw as u32)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(v) => u32::try_from(v).map_err(de::Error::custom),
                None => from_f64(n.as_f64().unwrap_or(-1.0)),
            },
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(0);
                }
                let parsed = trimmed
                    .parse::<f64>()
                    .map_err(|_| de::Error::custom(format!("invalid sample count '{s}'")))?;
                from_f64(parsed)
            }
            Some(other) => Err(de::Error::custom(format!(
                "invalid sample count {other}"
            ))),
        }
    }
}

mod blank_as_none {
    use serde::{Deserialize, Deserializer};

    use crate::domain::PackageId;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<PackageId>, D::Error> {
        Ok(Option::<String>::deserialize(deserializer)?
            .filter(|raw| !raw.trim().is_empty())
            .map(PackageId))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plant {
    #[serde(rename = "Plant")]
    pub plant: PlantId,
    #[serde(rename = "Plantname", alias = "PlantName", default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantUser {
    #[serde(rename = "Uname", default)]
    pub user: String,
    #[serde(rename = "Plant", default)]
    pub plant: PlantId,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

impl PlantUser {
    pub fn assign_current_user(plant: PlantId) -> Self {
        Self {
            user: CURRENT_USER.to_string(),
            plant,
            message: String::new(),
            status: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    #[serde(rename = "Plant")]
    pub plant: PlantId,
    #[serde(rename = "ContainerId")]
    pub container_id: ContainerId,
    #[serde(rename = "ConInsId")]
    pub container_instance_id: ContainerInstanceId,
    #[serde(rename = "AccountName", default)]
    pub account_name: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(
        rename = "Samplesreceived",
        alias = "SamplesReceived",
        default,
        deserialize_with = "lenient_count::deserialize"
    )]
    pub samples_received: u32,
    #[serde(
        rename = "ContainerTotal",
        default,
        deserialize_with = "lenient_count::deserialize"
    )]
    pub container_total: u32,
    #[serde(
        rename = "PackageId",
        default,
        deserialize_with = "blank_as_none::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub package_id: Option<PackageId>,
}

impl Container {
    pub fn key(&self) -> ContainerKey {
        ContainerKey {
            container_id: self.container_id.clone(),
            container_instance_id: self.container_instance_id.clone(),
        }
    }

    /// Every expected sample has been received; an empty container (0/0) counts as ready.
    pub fn is_ready(&self) -> bool {
        self.samples_received == self.container_total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "SampleId")]
    pub sample_id: SampleId,
    #[serde(rename = "ContainerId", default)]
    pub container_id: ContainerId,
    #[serde(rename = "ConInsId", default)]
    pub container_instance_id: ContainerInstanceId,
}

/// Body posted to the container header endpoint (pull sample, abandon).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeaderPayload {
    #[serde(rename = "AccountName")]
    pub account_name: String,
    #[serde(rename = "Plant")]
    pub plant: PlantId,
    #[serde(rename = "ContainerId")]
    pub container_id: ContainerId,
    #[serde(rename = "ConInsId")]
    pub container_instance_id: ContainerInstanceId,
    #[serde(rename = "Status", skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
    #[serde(rename = "PackageId", skip_serializing_if = "Option::is_none", default)]
    pub package_id: Option<String>,
    #[serde(rename = "Comments")]
    pub comments: String,
    #[serde(rename = "toContainerItems", default)]
    pub items: Vec<ContainerItemPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerItemPayload {
    #[serde(rename = "Plant", skip_serializing_if = "Option::is_none", default)]
    pub plant: Option<PlantId>,
    #[serde(rename = "ContainerId")]
    pub container_id: ContainerId,
    #[serde(rename = "ConInsId")]
    pub container_instance_id: ContainerInstanceId,
    #[serde(rename = "SampleId", skip_serializing_if = "Option::is_none", default)]
    pub sample_id: Option<SampleId>,
    #[serde(rename = "SamplePull", skip_serializing_if = "Option::is_none", default)]
    pub sample_pull: Option<bool>,
    #[serde(rename = "Comments")]
    pub comments: String,
}

/// One backend message. Older service versions emit `MsgType`, newer ones `MsgTyp`; some emit
/// both with one of them blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMessageLogEntry")]
pub struct MessageLogEntry {
    #[serde(rename = "MsgTyp")]
    pub msg_type: String,
    #[serde(rename = "Message")]
    pub message: String,
}

#[derive(Deserialize)]
struct RawMessageLogEntry {
    #[serde(rename = "MsgTyp", default)]
    msg_typ: Option<String>,
    #[serde(rename = "MsgType", default)]
    msg_type: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

impl From<RawMessageLogEntry> for MessageLogEntry {
    fn from(raw: RawMessageLogEntry) -> Self {
        let msg_type = [raw.msg_typ, raw.msg_type]
            .into_iter()
            .flatten()
            .find(|value| !value.trim().is_empty())
            .unwrap_or_default();
        Self {
            msg_type,
            message: raw.message.unwrap_or_default(),
        }
    }
}

impl MessageLogEntry {
    pub fn new(msg_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::classify(&self.msg_type)
    }

    pub fn is_failure(&self) -> bool {
        self.kind() == MessageKind::Failure
    }

    pub fn is_success(&self) -> bool {
        self.kind() == MessageKind::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalItem {
    #[serde(rename = "PackageId", default)]
    pub package_id: PackageId,
    #[serde(rename = "ContainerId")]
    pub container_id: ContainerId,
    #[serde(rename = "ConInsId")]
    pub container_instance_id: ContainerInstanceId,
}

impl ProposalItem {
    pub fn new(package_id: PackageId, key: ContainerKey) -> Self {
        Self {
            package_id,
            container_id: key.container_id,
            container_instance_id: key.container_instance_id,
        }
    }

    pub fn key(&self) -> ContainerKey {
        ContainerKey {
            container_id: self.container_id.clone(),
            container_instance_id: self.container_instance_id.clone(),
        }
    }
}

/// Packaging proposal header; used both as request body and as response entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalHeader {
    #[serde(rename = "PackageId", default)]
    pub package_id: PackageId,
    #[serde(rename = "Plant", default)]
    pub plant: PlantId,
    #[serde(rename = "PlantName", default, skip_serializing)]
    pub plant_name: String,
    #[serde(rename = "WeightGross", default)]
    pub weight_gross: String,
    #[serde(rename = "WeightDryIce", default)]
    pub weight_dry_ice: String,
    #[serde(rename = "WeightUnits", default)]
    pub weight_units: String,
    #[serde(rename = "Comments", default)]
    pub comments: String,
    #[serde(rename = "PackageMaterial", default)]
    pub package_material: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "CreatedBy", default)]
    pub created_by: String,
    #[serde(
        rename = "toPackagingProposalItem",
        default,
        deserialize_with = "results::deserialize"
    )]
    pub items: Vec<ProposalItem>,
    #[serde(
        rename = "toPackagingProposalMessagelog",
        default,
        deserialize_with = "results::deserialize"
    )]
    pub messages: Vec<MessageLogEntry>,
}

impl ProposalHeader {
    /// Header skeleton the service expects on create: placeholder weights, single-space texts.
    pub fn draft(plant: PlantId, items: Vec<ProposalItem>) -> Self {
        Self {
            package_id: PackageId::default(),
            plant,
            plant_name: String::new(),
            weight_gross: DEFAULT_WEIGHT.to_string(),
            weight_dry_ice: DEFAULT_WEIGHT.to_string(),
            weight_units: String::new(),
            comments: " ".to_string(),
            package_material: " ".to_string(),
            status: String::new(),
            created_by: String::new(),
            items,
            messages: Vec::new(),
        }
    }

    pub fn can_open(&self) -> bool {
        self.status.trim() == PROPOSAL_STATUS_CREATED
    }

    pub fn has_failure(&self) -> bool {
        self.messages.iter().any(MessageLogEntry::is_failure)
    }
}

/// Body of the item-level proposal actions (add / unassign containers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalItemsPayload {
    #[serde(rename = "PackageId")]
    pub package_id: PackageId,
    #[serde(rename = "Plant")]
    pub plant: PlantId,
    #[serde(rename = "toPackagingProposalItem")]
    pub items: Vec<ProposalItem>,
    #[serde(rename = "toPackagingProposalMessagelog")]
    pub messages: Vec<MessageLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingMaterial {
    #[serde(rename = "PackageMaterial")]
    pub code: String,
    #[serde(rename = "PackageDesc", default)]
    pub description: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
