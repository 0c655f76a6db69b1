//! Scripted collaborators shared by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::{Intent, PlantId},
    error::ServiceError,
    protocol::Container,
};
use tokio::sync::Notify;

use crate::{
    gateway::{DataGateway, Filter, GatewayError, Resource},
    message_log::{Notice, Presenter},
};

#[derive(Debug, Clone)]
pub(crate) struct GatewayCall {
    pub path: String,
    pub filters: Vec<Filter>,
    pub payload: Option<Value>,
    pub intent: Option<Intent>,
}

type Script = VecDeque<Result<Value, GatewayError>>;

#[derive(Default)]
pub(crate) struct ScriptedGateway {
    calls: Mutex<Vec<GatewayCall>>,
    reads: Mutex<HashMap<String, Script>>,
    creates: Mutex<HashMap<(String, Option<Intent>), Script>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_read(&self, resource: &Resource, response: Result<Value, GatewayError>) {
        self.reads
            .lock()
            .expect("lock")
            .entry(resource.path())
            .or_default()
            .push_back(response);
    }

    pub fn on_create(
        &self,
        resource: &Resource,
        intent: Option<Intent>,
        response: Result<Value, GatewayError>,
    ) {
        self.creates
            .lock()
            .expect("lock")
            .entry((resource.path(), intent))
            .or_default()
            .push_back(response);
    }

    /// Responses on `resource` wait until the returned handle is notified.
    pub fn hold(&self, resource: &Resource) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .expect("lock")
            .insert(resource.path(), notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn creates_with(&self, intent: Intent) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.intent == Some(intent))
            .collect()
    }

    pub fn reads_of(&self, resource: &Resource) -> usize {
        let path = resource.path();
        self.calls()
            .iter()
            .filter(|call| call.payload.is_none() && call.path == path)
            .count()
    }

    fn next(script: Option<&mut Script>, path: &str) -> Result<Value, GatewayError> {
        match script {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("non-empty"),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => Err(not_found(path)),
        }
    }

    async fn wait_if_held(&self, path: &str) {
        let hold = self.holds.lock().expect("lock").get(path).cloned();
        if let Some(notify) = hold {
            notify.notified().await;
        }
    }
}

#[async_trait]
impl DataGateway for ScriptedGateway {
    async fn read(&self, resource: &Resource, filters: &[Filter]) -> Result<Value, GatewayError> {
        let path = resource.path();
        self.calls.lock().expect("lock").push(GatewayCall {
            path: path.clone(),
            filters: filters.to_vec(),
            payload: None,
            intent: None,
        });
        let response = Self::next(self.reads.lock().expect("lock").get_mut(&path), &path);
        self.wait_if_held(&path).await;
        response
    }

    async fn create(
        &self,
        resource: &Resource,
        payload: Value,
        intent: Option<Intent>,
    ) -> Result<Value, GatewayError> {
        let path = resource.path();
        self.calls.lock().expect("lock").push(GatewayCall {
            path: path.clone(),
            filters: Vec::new(),
            payload: Some(payload),
            intent,
        });
        let response = Self::next(
            self.creates
                .lock()
                .expect("lock")
                .get_mut(&(path.clone(), intent)),
            &path,
        );
        self.wait_if_held(&path).await;
        response
    }
}

pub(crate) fn not_found(path: &str) -> GatewayError {
    GatewayError::Service {
        path: path.to_string(),
        source: ServiceError::new(404, "Resource not found"),
    }
}

pub(crate) fn transport_error(path: &str) -> GatewayError {
    GatewayError::Transport {
        path: path.to_string(),
        message: "connection reset".to_string(),
    }
}

#[derive(Default)]
pub(crate) struct RecordingPresenter {
    notices: Mutex<Vec<Notice>>,
    toasts: Mutex<Vec<String>>,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("lock").clone()
    }

    pub fn last_notice(&self) -> Option<Notice> {
        self.notices.lock().expect("lock").last().cloned()
    }

    pub fn toasts(&self) -> Vec<String> {
        self.toasts.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn show(&self, notice: Notice) {
        self.notices.lock().expect("lock").push(notice);
    }

    fn toast(&self, text: &str) {
        self.toasts.lock().expect("lock").push(text.to_string());
    }
}

pub(crate) fn plant() -> PlantId {
    PlantId::new("P100")
}

pub(crate) fn container(id: &str, received: u32, total: u32) -> Container {
    container_for_account(id, "ACME", received, total)
}

pub(crate) fn container_for_account(
    id: &str,
    account: &str,
    received: u32,
    total: u32,
) -> Container {
    Container {
        plant: plant(),
        container_id: id.into(),
        container_instance_id: "0001".into(),
        account_name: account.to_string(),
        status: "01".to_string(),
        samples_received: received,
        container_total: total,
        package_id: None,
    }
}

pub(crate) fn containers_json(containers: &[Container]) -> Value {
    json!({ "results": containers })
}

pub(crate) fn message(msg_type: &str, text: &str) -> Value {
    json!({ "MsgTyp": msg_type, "Message": text })
}
