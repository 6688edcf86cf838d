//! PostgREST gateway
//!
//! Talks to the hosted backend's REST endpoint:
//!
//! | Call     | Request                                              |
//! |----------|------------------------------------------------------|
//! | query    | `GET    /rest/v1/{table}?select=*&col=eq.v&order=c.desc` |
//! | insert   | `POST   /rest/v1/{table}`                            |
//! | update   | `PATCH  /rest/v1/{table}?id=eq.{id}`                 |
//! | delete   | `DELETE /rest/v1/{table}?col=eq.v`                   |
//!
//! Writes ask for `Prefer: return=representation` so the stored rows come
//! back in the response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::realtime::{spawn_listener, RealtimeConfig};
use super::{Filter, Gateway, GatewayError, GatewayResult, Order, Record, Resource, Subscription};

const REST_PATH: &str = "rest/v1";

/// Gateway backed by a PostgREST endpoint
pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    realtime: Option<RealtimeConfig>,
}

impl RestGateway {
    /// Create a gateway for `base_url` authenticated with `api_key`
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            realtime: None,
        })
    }

    /// Enable the realtime change channel
    pub fn with_realtime(mut self) -> Self {
        self.realtime = Some(RealtimeConfig::new(&self.base_url, &self.api_key));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, resource: Resource) -> String {
        format!("{}/{}/{}", self.base_url, REST_PATH, resource.table())
    }

    fn request(&self, method: Method, resource: Resource) -> RequestBuilder {
        self.client
            .request(method, self.table_url(resource))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn rows(
        response: Response,
        resource: Resource,
        id: Option<&str>,
    ) -> GatewayResult<Vec<Record>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status.as_u16(), resource, id, body));
        }
        let value: Value = response.json().await?;
        match value {
            Value::Array(rows) => Ok(rows),
            other => Err(GatewayError::Decode(format!(
                "expected an array of {} rows, got {}",
                resource, other
            ))),
        }
    }
}

/// Render a filter as PostgREST `column=eq.value` query pairs
fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    filter
        .conditions()
        .iter()
        .map(|(column, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (column.clone(), format!("eq.{}", value))
        })
        .collect()
}

fn order_param(order: &Order) -> (String, String) {
    let direction = if order.ascending { "asc" } else { "desc" };
    ("order".to_string(), format!("{}.{}", order.column, direction))
}

#[async_trait]
impl Gateway for RestGateway {
    async fn query(
        &self,
        resource: Resource,
        filter: Filter,
        order: Option<Order>,
    ) -> GatewayResult<Vec<Record>> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter_params(&filter));
        if let Some(order) = &order {
            params.push(order_param(order));
        }

        debug!("GET {} {:?}", resource, params);
        let response = self.request(Method::GET, resource).query(&params).send().await?;
        Self::rows(response, resource, None).await
    }

    async fn insert(&self, resource: Resource, record: Record) -> GatewayResult<Record> {
        debug!("POST {}", resource);
        let response = self
            .request(Method::POST, resource)
            .header("Prefer", "return=representation")
            .json(&record)
            .send()
            .await?;

        Self::rows(response, resource, None)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode(format!("insert into {} returned no row", resource)))
    }

    async fn update(&self, resource: Resource, id: &str, patch: Record) -> GatewayResult<Record> {
        debug!("PATCH {} id={}", resource, id);
        let response = self
            .request(Method::PATCH, resource)
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;

        // PostgREST answers 200 with an empty array when nothing matched
        Self::rows(response, resource, Some(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound {
                resource,
                id: id.to_string(),
            })
    }

    async fn delete(&self, resource: Resource, filter: Filter) -> GatewayResult<u64> {
        let params = filter_params(&filter);
        debug!("DELETE {} {:?}", resource, params);
        let response = self
            .request(Method::DELETE, resource)
            .query(&params)
            .header("Prefer", "return=representation")
            .send()
            .await?;

        Ok(Self::rows(response, resource, None).await?.len() as u64)
    }

    async fn subscribe_changes(&self, resources: &[Resource]) -> GatewayResult<Subscription> {
        let Some(config) = &self.realtime else {
            return Ok(Subscription::idle());
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn_listener(config.clone(), resources.to_vec(), tx);
        Ok(Subscription::new(rx, task))
    }
}
