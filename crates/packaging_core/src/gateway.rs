//! Abstract read/create contract against the remote packaging service.

use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{ContainerKey, Intent, PackageId, PlantId},
    error::ServiceError,
    protocol::{Results, CURRENT_USER},
};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("transport failure on {path}: {message}")]
    Transport { path: String, message: String },
    #[error("service rejected {path}: {source}")]
    Service {
        path: String,
        #[source]
        source: ServiceError,
    },
    #[error("unexpected payload from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("could not encode request for {path}: {message}")]
    Encode { path: String, message: String },
}

impl GatewayError {
    pub fn path(&self) -> &str {
        match self {
            GatewayError::Transport { path, .. }
            | GatewayError::Service { path, .. }
            | GatewayError::Decode { path, .. }
            | GatewayError::Encode { path, .. } => path,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Service { source, .. } if source.is_not_found())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    pub name: &'static str,
    pub value: String,
}

impl KeyField {
    pub fn new(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// Ordered key predicate of an addressed entity, rendered as `A='x',B='y'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKey(Vec<KeyField>);

impl EntityKey {
    pub fn new(fields: Vec<KeyField>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.0
    }

    pub fn package(package_id: &PackageId) -> Self {
        Self(vec![KeyField::new("PackageId", package_id.as_str())])
    }

    pub fn container(plant: &PlantId, key: &ContainerKey) -> Self {
        Self(vec![
            KeyField::new("Plant", plant.as_str()),
            KeyField::new("ContainerId", key.container_id.as_str()),
            KeyField::new("ConInsId", key.container_instance_id.as_str()),
        ])
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, field) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", field.name, quote(&field.value))?;
        }
        Ok(())
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Logical resources consumed by the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Plants,
    CurrentUserPlant,
    PlantUsers,
    Containers,
    ContainerSamples(EntityKey),
    ProposalHeaders,
    ProposalHeader(EntityKey),
    ProposalItems(EntityKey),
    PackagingMaterials,
}

impl Resource {
    pub fn path(&self) -> String {
        match self {
            Resource::Plants => "/PlantDetailsSet".to_string(),
            Resource::CurrentUserPlant => format!("/PlantUserSet({})", quote(CURRENT_USER)),
            Resource::PlantUsers => "/PlantUserSet".to_string(),
            Resource::Containers => "/ContainerHeaderSet".to_string(),
            Resource::ContainerSamples(key) => {
                format!("/ContainerHeaderSet({key})/toContainerItems")
            }
            Resource::ProposalHeaders => "/PackagingProposalHeaderSet".to_string(),
            Resource::ProposalHeader(key) => format!("/PackagingProposalHeaderSet({key})"),
            Resource::ProposalItems(key) => {
                format!("/PackagingProposalHeaderSet({key})/toPackagingProposalItem")
            }
            Resource::PackagingMaterials => "/PackagingMaterialsSet".to_string(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Equality filter on a collection property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: &'static str,
    pub value: String,
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }

    pub fn to_query(filters: &[Filter]) -> Option<String> {
        if filters.is_empty() {
            return None;
        }
        Some(
            filters
                .iter()
                .map(|f| format!("{} eq {}", f.field, quote(&f.value)))
                .collect::<Vec<_>>()
                .join(" and "),
        )
    }
}

#[async_trait]
pub trait DataGateway: Send + Sync {
    /// Reads one entity or a collection. Envelopes (`d`, `results`) are already unwrapped.
    async fn read(&self, resource: &Resource, filters: &[Filter]) -> Result<Value, GatewayError>;

    /// Creates an entity. Business actions on overloaded endpoints carry an explicit intent.
    async fn create(
        &self,
        resource: &Resource,
        payload: Value,
        intent: Option<Intent>,
    ) -> Result<Value, GatewayError>;
}

fn decode<T: DeserializeOwned>(resource: &Resource, value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|err| GatewayError::Decode {
        path: resource.path(),
        message: err.to_string(),
    })
}

pub async fn read_entity<T: DeserializeOwned>(
    gateway: &dyn DataGateway,
    resource: &Resource,
) -> Result<T, GatewayError> {
    let value = gateway.read(resource, &[]).await?;
    decode(resource, value)
}

pub async fn read_collection<T: DeserializeOwned>(
    gateway: &dyn DataGateway,
    resource: &Resource,
    filters: &[Filter],
) -> Result<Vec<T>, GatewayError> {
    let value = gateway.read(resource, filters).await?;
    decode::<Results<T>>(resource, value).map(|Results(items)| items)
}

pub async fn create_entity<P: Serialize, T: DeserializeOwned>(
    gateway: &dyn DataGateway,
    resource: &Resource,
    payload: &P,
    intent: Option<Intent>,
) -> Result<T, GatewayError> {
    let body = serde_json::to_value(payload).map_err(|err| GatewayError::Encode {
        path: resource.path(),
        message: err.to_string(),
    })?;
    let value = gateway.create(resource, body, intent).await?;
    decode(resource, value)
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
