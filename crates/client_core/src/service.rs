use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ExplanationMethod, PredictionResult},
    error::ApiError,
    protocol::{ExplainResponse, HealthResponse},
};
use tracing::{debug, warn};
use url::Url;

use crate::{error::ServiceError, state::UploadedFile};

const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";
const PREDICT_PATH: &str = "api/predict";
const EXPLAIN_PATH: &str = "api/explain";
const HEALTH_PATH: &str = "api/health";

/// Remote classification and explanation service.
#[async_trait]
pub trait ClassifierService: Send + Sync {
    async fn predict(
        &self,
        file: &UploadedFile,
        method: ExplanationMethod,
    ) -> Result<PredictionResult, ServiceError>;

    async fn explain(
        &self,
        file: &UploadedFile,
        method: ExplanationMethod,
        predicted_class: Option<&str>,
    ) -> Result<ExplainResponse, ServiceError>;

    async fn capabilities(&self) -> Result<HealthResponse, ServiceError>;
}

pub struct MissingClassifierService;

#[async_trait]
impl ClassifierService for MissingClassifierService {
    async fn predict(
        &self,
        _file: &UploadedFile,
        _method: ExplanationMethod,
    ) -> Result<PredictionResult, ServiceError> {
        Err(ServiceError::Unavailable)
    }

    async fn explain(
        &self,
        _file: &UploadedFile,
        _method: ExplanationMethod,
        _predicted_class: Option<&str>,
    ) -> Result<ExplainResponse, ServiceError> {
        Err(ServiceError::Unavailable)
    }

    async fn capabilities(&self) -> Result<HealthResponse, ServiceError> {
        Err(ServiceError::Unavailable)
    }
}

pub struct HttpClassifierService {
    http: Client,
    base_url: Url,
}

impl HttpClassifierService {
    pub fn new(base_url: Url, timeout: Option<Duration>) -> Result<Self, ServiceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, base_url))
    }

    pub fn with_client(http: Client, mut base_url: Url) -> Self {
        // Url::join replaces the last path segment unless the base ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| ServiceError::Transport(format!("invalid endpoint '{path}': {e}")))
    }
}

fn file_part(file: &UploadedFile) -> Part {
    let media_type = file
        .media_type
        .as_deref()
        .map(str::trim)
        .filter(|media_type| !media_type.is_empty())
        .unwrap_or(DEFAULT_MEDIA_TYPE);
    let part = Part::bytes(file.bytes.to_vec()).file_name(file.name.clone());
    match part.mime_str(media_type) {
        Ok(part) => part,
        Err(err) => {
            warn!(file = %file.name, media_type, error = %err, "ignoring unparsable media type");
            Part::bytes(file.bytes.to_vec()).file_name(file.name.clone())
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiError>(&body)
            .ok()
            .and_then(|err| err.message());
        return Err(ServiceError::Status {
            status: status.as_u16(),
            detail,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ServiceError::Decode(e.to_string()))
}

#[async_trait]
impl ClassifierService for HttpClassifierService {
    async fn predict(
        &self,
        file: &UploadedFile,
        method: ExplanationMethod,
    ) -> Result<PredictionResult, ServiceError> {
        let url = self.endpoint(PREDICT_PATH)?;
        debug!(file = %file.name, %method, "sending predict request");
        let form = Form::new()
            .part("file", file_part(file))
            .text("method", method.as_str());
        let response = self.http.post(url).multipart(form).send().await?;
        read_json(response).await
    }

    async fn explain(
        &self,
        file: &UploadedFile,
        method: ExplanationMethod,
        predicted_class: Option<&str>,
    ) -> Result<ExplainResponse, ServiceError> {
        let url = self.endpoint(EXPLAIN_PATH)?;
        debug!(file = %file.name, %method, predicted_class, "sending explain request");
        let mut form = Form::new()
            .part("file", file_part(file))
            .text("method", method.as_str());
        if let Some(predicted_class) = predicted_class {
            form = form.text("predicted_class", predicted_class.to_string());
        }
        let response = self.http.post(url).multipart(form).send().await?;
        read_json(response).await
    }

    async fn capabilities(&self) -> Result<HealthResponse, ServiceError> {
        let url = self.endpoint(HEALTH_PATH)?;
        let response = self.http.get(url).send().await?;
        read_json(response).await
    }
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
