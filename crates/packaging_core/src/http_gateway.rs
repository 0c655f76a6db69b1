//! `DataGateway` over the OData v2 JSON service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderMap, Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use shared::{domain::Intent, error::ServiceError};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::gateway::{DataGateway, Filter, GatewayError, Resource};

const CSRF_HEADER: &str = "x-csrf-token";
const INTENT_HEADER: &str = "intent";

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub service_url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

pub struct HttpGateway {
    http: Client,
    service_url: Url,
    username: Option<String>,
    password: Option<String>,
    csrf_token: Mutex<Option<String>>,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let mut service_url = config.service_url;
        if !service_url.path().ends_with('/') {
            let path = format!("{}/", service_url.path());
            service_url.set_path(&path);
        }
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| GatewayError::Transport {
                path: service_url.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            service_url,
            username: config.username,
            password: config.password,
            csrf_token: Mutex::new(None),
        })
    }

    fn url_for(&self, resource: &Resource) -> Result<Url, GatewayError> {
        let path = resource.path();
        self.service_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| GatewayError::Encode {
                path,
                message: err.to_string(),
            })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    async fn fetch_csrf_token(&self) -> Result<Option<String>, GatewayError> {
        let path = self.service_url.to_string();
        let response = self
            .authorize(self.http.get(self.service_url.clone()))
            .header(CSRF_HEADER, "Fetch")
            .send()
            .await
            .map_err(|err| transport(&path, err))?;
        let token = header_value(response.headers(), CSRF_HEADER)
            .filter(|token| !token.eq_ignore_ascii_case("required"));
        debug!(has_token = token.is_some(), "gateway: fetched csrf token");
        Ok(token)
    }

    async fn csrf_token(&self, refresh: bool) -> Result<Option<String>, GatewayError> {
        let mut guard = self.csrf_token.lock().await;
        if refresh || guard.is_none() {
            *guard = self.fetch_csrf_token().await?;
        }
        Ok(guard.clone())
    }

    async fn send_create(
        &self,
        url: &Url,
        payload: &Value,
        intent: Option<Intent>,
        token: Option<String>,
    ) -> Result<Response, GatewayError> {
        let mut request = self
            .authorize(self.http.post(url.clone()))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(payload);
        if let Some(intent) = intent {
            request = request.header(INTENT_HEADER, intent.as_str());
        }
        if let Some(token) = token {
            request = request.header(CSRF_HEADER, token);
        }
        request.send().await.map_err(|err| transport(url.as_str(), err))
    }
}

#[async_trait]
impl DataGateway for HttpGateway {
    async fn read(&self, resource: &Resource, filters: &[Filter]) -> Result<Value, GatewayError> {
        let url = self.url_for(resource)?;
        let mut query = vec![("$format", "json".to_string())];
        if let Some(filter) = Filter::to_query(filters) {
            query.push(("$filter", filter));
        }
        debug!(path = %resource, filters = filters.len(), "gateway: read");
        let response = self
            .authorize(self.http.get(url))
            .query(&query)
            .send()
            .await
            .map_err(|err| transport(&resource.path(), err))?;
        decode_response(resource, response).await
    }

    async fn create(
        &self,
        resource: &Resource,
        payload: Value,
        intent: Option<Intent>,
    ) -> Result<Value, GatewayError> {
        let url = self.url_for(resource)?;
        debug!(path = %resource, intent = ?intent, "gateway: create");
        let token = self.csrf_token(false).await?;
        let mut response = self.send_create(&url, &payload, intent, token).await?;

        let token_rejected = response.status() == StatusCode::FORBIDDEN
            && header_value(response.headers(), CSRF_HEADER)
                .is_some_and(|v| v.eq_ignore_ascii_case("required"));
        if token_rejected {
            warn!(path = %resource, "gateway: csrf token rejected; refetching once");
            let token = self.csrf_token(true).await?;
            response = self.send_create(&url, &payload, intent, token).await?;
        }
        decode_response(resource, response).await
    }
}

fn transport(path: &str, err: reqwest::Error) -> GatewayError {
    GatewayError::Transport {
        path: path.to_string(),
        message: err.to_string(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn decode_response(resource: &Resource, response: Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| transport(&resource.path(), err))?;
    if !status.is_success() {
        return Err(GatewayError::Service {
            path: resource.path(),
            source: ServiceError::from_response(status.as_u16(), &body),
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_str(&body).map_err(|err| GatewayError::Decode {
        path: resource.path(),
        message: err.to_string(),
    })?;
    Ok(unwrap_envelope(value))
}

/// Strips the `{"d": ..}` envelope; collection `results` wrappers are left for the typed decoders.
pub(crate) fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("d") => {
            map.remove("d").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
#[path = "tests/http_gateway_tests.rs"]
mod tests;
