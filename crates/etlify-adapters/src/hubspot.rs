//! HubSpot v3 reference adapter (spec.md §4.3 "HubSpot-shaped adapter
//! specifics"; HTTP wire grounded on `components/support/rs_client`'s
//! request-building shape, ported from `viaduct::Request` to `reqwest`
//! since this adapter is async end to end).

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use etlify_core::{Adapter, AdapterError, AdapterResult, Payload};

use crate::http::{map_status_error, map_transport_error, retry_after_secs};

const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";

/// Adapter against HubSpot's CRM v3 objects API.
///
/// `id_property` lookups against `"email"` get the three-way filter group
/// spec.md prescribes (lowercased exact match, `additional_emails`
/// containment, and a `%2B`-encoded fallback) unconditionally, regardless
/// of whether the value actually contains a `+` (spec.md §9 Open
/// Questions, resolved in DESIGN.md).
pub struct HubSpotAdapter {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HubSpotAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
        }
    }

    /// Overrides the base URL; used by tests to point at a `mockito` server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn headers(&self) -> AdapterResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", self.token);
        debug!(
            "hubspot request authorized with {}",
            etlify_error_support::redact_bearer_token(&bearer)
        );
        let auth = HeaderValue::from_str(&bearer)
            .map_err(|_| AdapterError::Unauthorized("malformed bearer token".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }

    fn search_filter_groups(id_property: &str, value: &str) -> Value {
        if id_property == "email" {
            let lowercased = value.to_ascii_lowercase();
            let plus_encoded = lowercased.replace('+', "%2B");
            serde_json::json!([
                { "filters": [{ "propertyName": "email", "operator": "EQ", "value": lowercased }] },
                { "filters": [{ "propertyName": "additional_emails", "operator": "CONTAINS_TOKEN", "value": lowercased }] },
                { "filters": [{ "propertyName": "email", "operator": "EQ", "value": plus_encoded }] },
            ])
        } else {
            serde_json::json!([
                { "filters": [{ "propertyName": id_property, "operator": "EQ", "value": value }] },
            ])
        }
    }

    /// Returns the remote id on a hit, `None` on a miss (including a 404,
    /// which spec.md treats as "not found, proceed to create").
    async fn search(
        &self,
        object_type: &str,
        id_property: &str,
        value: &str,
    ) -> AdapterResult<Option<String>> {
        let url = format!("{}/crm/v3/objects/{object_type}/search", self.base_url);
        debug!("hubspot search {}", etlify_error_support::redact_url(&url));
        let body = serde_json::json!({
            "filterGroups": Self::search_filter_groups(id_property, value),
            "limit": 1,
        });

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("hubspot search miss (404) for {object_type}/{id_property}");
            return Ok(None);
        }

        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(AdapterError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
            return Err(map_status_error(status, &text));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| AdapterError::ApiError { status: status.as_u16(), message: e.to_string() })?;
        let first_id = parsed
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|record| record.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(first_id)
    }

    async fn create(&self, object_type: &str, properties: &Payload) -> AdapterResult<String> {
        let url = format!("{}/crm/v3/objects/{object_type}", self.base_url);
        let body = serde_json::json!({ "properties": properties });
        self.write(reqwest::Method::POST, &url, Some(&body)).await
    }

    async fn patch(
        &self,
        object_type: &str,
        crm_id: &str,
        properties: &Payload,
    ) -> AdapterResult<String> {
        let url = format!("{}/crm/v3/objects/{object_type}/{crm_id}", self.base_url);
        let body = serde_json::json!({ "properties": properties });
        self.write(reqwest::Method::PATCH, &url, Some(&body)).await
    }

    async fn write(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> AdapterResult<String> {
        let mut request = self.client.request(method, url).headers(self.headers()?);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(AdapterError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }
            return Err(map_status_error(status, &text));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| AdapterError::ApiError { status: status.as_u16(), message: e.to_string() })?;
        // spec.md §4.3: "A 2xx create response without an `id` field is
        // mapped to ApiError."
        parsed
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AdapterError::ApiError {
                status: status.as_u16(),
                message: "response missing id field".to_string(),
            })
    }
}

#[async_trait]
impl Adapter for HubSpotAdapter {
    async fn upsert(
        &self,
        payload: &Payload,
        id_property: Option<&str>,
        object_type: &str,
    ) -> AdapterResult<String> {
        let lookup = match id_property {
            Some(prop) => payload.get(prop).and_then(Value::as_str).map(|v| (prop, v)),
            None => None,
        };

        // spec.md §4.3: "the `id_property` value MUST remain present in
        // the created record (adapters that strip it for lookup MUST
        // reinject it)" — HubSpot never strips it in the first place since
        // the lookup is a separate search call, but reinject defensively
        // in case a caller's serializer omitted it from `payload`.
        let mut properties: Payload = payload.clone();
        if let Some((prop, value)) = lookup {
            properties
                .entry(prop.to_string())
                .or_insert_with(|| Value::String(value.to_string()));
        }

        match lookup {
            Some((prop, value)) => match self.search(object_type, prop, value).await? {
                Some(existing_id) => self.patch(object_type, &existing_id, &properties).await,
                None => self.create(object_type, &properties).await,
            },
            None => self.create(object_type, &properties).await,
        }
    }

    async fn delete(&self, crm_id: &str, object_type: &str) -> AdapterResult<bool> {
        let url = format!("{}/crm/v3/objects/{object_type}/{crm_id}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let text = response.text().await.map_err(map_transport_error)?;
        Err(map_status_error(status, &text))
    }
}
