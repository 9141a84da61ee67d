//! HTTP client for a Confluent-compatible schema registry

use super::{RegisteredSchema, SchemaRegistrar, SchemaRegistry};
use crate::error::RegistryError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Deserialize)]
struct SchemaById {
    schema: String,
}

#[derive(Deserialize)]
struct SubjectVersion {
    subject: String,
    version: u32,
    id: u32,
    schema: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    schema: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: u32,
}

/// Registry reached over HTTP
///
/// Endpoints:
/// - `GET  /schemas/ids/{id}`
/// - `GET  /subjects/{subject}/versions/latest`
/// - `POST /subjects/{subject}/versions`
pub struct HttpSchemaRegistry {
    base_url: String,
    client: Client,
}

impl HttpSchemaRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| RegistryError::Request(format!("failed to build http client: {err}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: Response) -> Result<Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn lookup(&self, id: u32) -> Result<RegisteredSchema, RegistryError> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .header("Accept", CONTENT_TYPE)
            .send()
            .await
            .map_err(|err| RegistryError::Request(format!("GET {url}: {err}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::IdNotFound(id));
        }

        let payload: SchemaById = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|err| RegistryError::Response(err.to_string()))?;

        Ok(RegisteredSchema {
            id,
            subject: String::new(),
            version: 0,
            definition: payload.schema,
        })
    }

    async fn lookup_latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError> {
        let url = format!("{}/subjects/{}/versions/latest", self.base_url, subject);
        let response = self
            .client
            .get(&url)
            .header("Accept", CONTENT_TYPE)
            .send()
            .await
            .map_err(|err| RegistryError::Request(format!("GET {url}: {err}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::SubjectNotFound(subject.to_string()));
        }

        let payload: SubjectVersion = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|err| RegistryError::Response(err.to_string()))?;

        Ok(RegisteredSchema {
            id: payload.id,
            subject: payload.subject,
            version: payload.version,
            definition: payload.schema,
        })
    }
}

#[async_trait]
impl SchemaRegistrar for HttpSchemaRegistry {
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError> {
        let url = format!("{}/subjects/{}/versions", self.base_url, subject);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", CONTENT_TYPE)
            .json(&RegisterRequest { schema: definition })
            .send()
            .await
            .map_err(|err| RegistryError::Request(format!("POST {url}: {err}")))?;

        let payload: RegisterResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|err| RegistryError::Response(err.to_string()))?;

        Ok(payload.id)
    }
}
