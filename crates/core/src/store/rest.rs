//! PostgREST-backed row store.
//!
//! Speaks the REST dialect exposed by Supabase-style backends:
//!
//! | Operation | Request |
//! |---|---|
//! | select all | `GET /rest/v1/<table>?select=*&order=date.asc` |
//! | select one | `GET /rest/v1/<table>?select=*&id=eq.<id>` |
//! | insert | `POST /rest/v1/<table>` with `Prefer: return=representation` |
//! | update | `PATCH /rest/v1/<table>?id=eq.<id>[&status=eq.<expected>]` with `Prefer: return=representation` |
//!
//! A conditional `PATCH` that matches no row returns an empty array, which maps to `None`.

use super::RowStore;
use crate::appointment::{
    Appointment, AppointmentId, AppointmentPatch, AppointmentStatus, NewAppointment,
};
use crate::config::StoreConfig;
use crate::error::StoreError;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;

const PREFER_REPRESENTATION: &str = "return=representation";

#[derive(Clone, Debug)]
pub struct RestRowStore {
    http: reqwest::Client,
    table_url: Url,
    api_key: String,
}

impl RestRowStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Uses a caller-configured HTTP client (timeouts, proxies) instead of the default one.
    pub fn with_client(http: reqwest::Client, config: &StoreConfig) -> Self {
        Self {
            http,
            table_url: config.table_url(),
            api_key: config.api_key().to_owned(),
        }
    }

    fn request(&self, method: Method, filters: &[(&str, String)]) -> RequestBuilder {
        self.http
            .request(method, self.table_url.clone())
            .header("apikey", &self.api_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .query(filters)
    }
}

fn row_filters(
    id: &AppointmentId,
    expected_status: Option<AppointmentStatus>,
) -> Vec<(&'static str, String)> {
    let mut filters = vec![("id", format!("eq.{id}"))];
    if let Some(status) = expected_status {
        filters.push(("status", format!("eq.{status}")));
    }
    filters
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| StoreError::Decode(e.to_string()))
}

impl RowStore for RestRowStore {
    async fn select_all(&self) -> Result<Vec<Appointment>, StoreError> {
        let filters = [("select", "*".to_owned()), ("order", "date.asc".to_owned())];
        let response = self.request(Method::GET, &filters).send().await?;
        decode(response).await
    }

    async fn select_one(&self, id: &AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let mut filters = row_filters(id, None);
        filters.push(("select", "*".to_owned()));
        let response = self.request(Method::GET, &filters).send().await?;
        let rows: Vec<Appointment> = decode(response).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, row: &NewAppointment) -> Result<Appointment, StoreError> {
        let response = self
            .request(Method::POST, &[])
            .header("Prefer", PREFER_REPRESENTATION)
            .json(row)
            .send()
            .await?;
        let rows: Vec<Appointment> = decode(response).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("insert returned no rows".into()))
    }

    async fn update(
        &self,
        id: &AppointmentId,
        expected_status: Option<AppointmentStatus>,
        patch: &AppointmentPatch,
    ) -> Result<Option<Appointment>, StoreError> {
        let filters = row_filters(id, expected_status);
        let response = self
            .request(Method::PATCH, &filters)
            .header("Prefer", PREFER_REPRESENTATION)
            .json(patch)
            .send()
            .await?;
        let rows: Vec<Appointment> = decode(response).await?;
        Ok(rows.into_iter().next())
    }
}
