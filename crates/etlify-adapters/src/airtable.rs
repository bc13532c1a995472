//! Airtable v0 reference adapter (spec.md §4.3 "Airtable-shaped adapter
//! specifics").

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use etlify_core::{Adapter, AdapterError, AdapterResult, Payload};

use crate::http::{map_status_error, map_transport_error, retry_after_secs};

const DEFAULT_BASE_URL: &str = "https://api.airtable.com";

/// Adapter against Airtable's REST API (`/v0/{baseId}/{table}`).
///
/// One adapter instance targets a single base/table pair — Airtable has no
/// notion of "object type" the way HubSpot does, so `object_type` on the
/// `Adapter` trait is accepted but ignored here (kept only so both
/// reference adapters share one trait signature).
pub struct AirtableAdapter {
    client: reqwest::Client,
    base_url: String,
    base_id: String,
    table: String,
    token: String,
}

impl AirtableAdapter {
    pub fn new(token: impl Into<String>, base_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            base_id: base_id.into(),
            table: table.into(),
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
            "airtable request authorized with {}",
            etlify_error_support::redact_bearer_token(&bearer)
        );
        let auth = HeaderValue::from_str(&bearer)
            .map_err(|_| AdapterError::Unauthorized("malformed bearer token".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }

    /// Field names containing `}` would terminate the `{Field Name}`
    /// reference early inside a formula; strip them (spec.md §4.3).
    fn sanitize_field_name(name: &str) -> String {
        name.replace('}', "")
    }

    /// Renders a JSON value as an Airtable formula literal (spec.md §4.3):
    /// strings escape `'`, booleans render as `TRUE()`/`FALSE()`, numerics
    /// are unquoted, and anything else (arrays/objects/null) serializes as
    /// JSON wrapped in single quotes.
    fn render_formula_value(value: &Value) -> String {
        match value {
            Value::String(s) => format!("'{}'", s.replace('\'', "\\'")),
            Value::Bool(true) => "TRUE()".to_string(),
            Value::Bool(false) => "FALSE()".to_string(),
            Value::Number(n) => n.to_string(),
            other => format!("'{}'", other.to_string().replace('\'', "\\'")),
        }
    }

    fn filter_by_formula(field: &str, value: &Value) -> String {
        format!(
            "{{{}}}={}",
            Self::sanitize_field_name(field),
            Self::render_formula_value(value)
        )
    }

    async fn lookup(&self, field: &str, value: &Value) -> AdapterResult<Option<String>> {
        let url = format!("{}/v0/{}/{}", self.base_url, self.base_id, self.table);
        let formula = Self::filter_by_formula(field, value);
        debug!("airtable lookup formula for field {field}");

        let response = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .query(&[
                ("filterByFormula", formula.as_str()),
                ("maxRecords", "1"),
                ("pageSize", "1"),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
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
            .get("records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .and_then(|record| record.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(first_id)
    }

    async fn create(&self, fields: &Payload) -> AdapterResult<String> {
        let url = format!("{}/v0/{}/{}", self.base_url, self.base_id, self.table);
        let body = serde_json::json!({ "fields": fields });
        self.write(reqwest::Method::POST, &url, &body).await
    }

    async fn patch(&self, record_id: &str, fields: &Payload) -> AdapterResult<String> {
        let url = format!("{}/v0/{}/{}/{record_id}", self.base_url, self.base_id, self.table);
        let body = serde_json::json!({ "fields": fields });
        self.write(reqwest::Method::PATCH, &url, &body).await
    }

    async fn write(&self, method: reqwest::Method, url: &str, body: &Value) -> AdapterResult<String> {
        let response = self
            .client
            .request(method, url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

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
impl Adapter for AirtableAdapter {
    async fn upsert(
        &self,
        payload: &Payload,
        id_property: Option<&str>,
        _object_type: &str,
    ) -> AdapterResult<String> {
        let lookup_value = id_property.and_then(|prop| payload.get(prop));

        match (id_property, lookup_value) {
            (Some(prop), Some(value)) => match self.lookup(prop, value).await? {
                Some(existing_id) => self.patch(&existing_id, payload).await,
                None => self.create(payload).await,
            },
            _ => self.create(payload).await,
        }
    }

    async fn delete(&self, crm_id: &str, _object_type: &str) -> AdapterResult<bool> {
        let url = format!("{}/v0/{}/{}/{crm_id}", self.base_url, self.base_id, self.table);
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
