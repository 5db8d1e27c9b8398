//! Scripted service fakes shared by the workflow tests.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{
    domain::{ExplanationMethod, PredictionResult},
    protocol::{ExplainResponse, HealthResponse},
};
use tokio::sync::{oneshot, Mutex};

use crate::{error::ServiceError, service::ClassifierService, state::UploadedFile};

pub(crate) type Reply<T> = oneshot::Receiver<Result<T, ServiceError>>;
pub(crate) type ReplySender<T> = oneshot::Sender<Result<T, ServiceError>>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Predict {
        file: String,
    },
    Explain {
        file: String,
        method: ExplanationMethod,
        predicted_class: Option<String>,
    },
    Capabilities,
}

/// Service whose replies are queued up front or released later through a
/// oneshot sender, so tests control completion order.
#[derive(Default)]
pub(crate) struct FakeService {
    predict_replies: Mutex<VecDeque<Reply<PredictionResult>>>,
    explain_replies: Mutex<HashMap<ExplanationMethod, VecDeque<Reply<ExplainResponse>>>>,
    capability_replies: Mutex<VecDeque<Reply<HealthResponse>>>,
    calls: Mutex<Vec<Call>>,
}

fn ready<T>(value: Result<T, ServiceError>) -> Reply<T> {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(value);
    rx
}

async fn await_reply<T>(reply: Option<Reply<T>>) -> Result<T, ServiceError> {
    match reply {
        Some(rx) => rx
            .await
            .unwrap_or_else(|_| Err(ServiceError::Transport("reply dropped".into()))),
        None => Err(ServiceError::Unavailable),
    }
}

impl FakeService {
    pub(crate) async fn push_predict(&self, reply: Result<PredictionResult, ServiceError>) {
        self.predict_replies.lock().await.push_back(ready(reply));
    }

    pub(crate) async fn gate_predict(&self) -> ReplySender<PredictionResult> {
        let (tx, rx) = oneshot::channel();
        self.predict_replies.lock().await.push_back(rx);
        tx
    }

    pub(crate) async fn push_explain(
        &self,
        method: ExplanationMethod,
        reply: Result<ExplainResponse, ServiceError>,
    ) {
        self.explain_replies
            .lock()
            .await
            .entry(method)
            .or_default()
            .push_back(ready(reply));
    }

    pub(crate) async fn gate_explain(
        &self,
        method: ExplanationMethod,
    ) -> ReplySender<ExplainResponse> {
        let (tx, rx) = oneshot::channel();
        self.explain_replies
            .lock()
            .await
            .entry(method)
            .or_default()
            .push_back(rx);
        tx
    }

    pub(crate) async fn push_capabilities(&self, reply: Result<HealthResponse, ServiceError>) {
        self.capability_replies.lock().await.push_back(ready(reply));
    }

    pub(crate) async fn gate_capabilities(&self) -> ReplySender<HealthResponse> {
        let (tx, rx) = oneshot::channel();
        self.capability_replies.lock().await.push_back(rx);
        tx
    }

    pub(crate) async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub(crate) async fn wait_for_calls(&self, count: usize) {
        while self.calls.lock().await.len() < count {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl ClassifierService for FakeService {
    async fn predict(
        &self,
        file: &UploadedFile,
        _method: ExplanationMethod,
    ) -> Result<PredictionResult, ServiceError> {
        self.calls.lock().await.push(Call::Predict {
            file: file.name.clone(),
        });
        let reply = self.predict_replies.lock().await.pop_front();
        await_reply(reply).await
    }

    async fn explain(
        &self,
        file: &UploadedFile,
        method: ExplanationMethod,
        predicted_class: Option<&str>,
    ) -> Result<ExplainResponse, ServiceError> {
        self.calls.lock().await.push(Call::Explain {
            file: file.name.clone(),
            method,
            predicted_class: predicted_class.map(str::to_string),
        });
        let reply = self
            .explain_replies
            .lock()
            .await
            .get_mut(&method)
            .and_then(VecDeque::pop_front);
        await_reply(reply).await
    }

    async fn capabilities(&self) -> Result<HealthResponse, ServiceError> {
        self.calls.lock().await.push(Call::Capabilities);
        let reply = self.capability_replies.lock().await.pop_front();
        await_reply(reply).await
    }
}

pub(crate) fn image_file(name: &str) -> UploadedFile {
    UploadedFile::new(name, Some("image/png".into()), name.as_bytes().to_vec())
}

pub(crate) fn prediction(label: &str, confidence: f64) -> PredictionResult {
    PredictionResult {
        predicted_class: label.into(),
        confidence,
        probabilities: BTreeMap::from([(label.to_string(), confidence)]),
    }
}

pub(crate) fn glioma_prediction() -> PredictionResult {
    PredictionResult {
        predicted_class: "glioma".into(),
        confidence: 0.87,
        probabilities: BTreeMap::from([
            ("glioma".to_string(), 0.87),
            ("normal".to_string(), 0.05),
            ("meningioma".to_string(), 0.08),
        ]),
    }
}

pub(crate) fn encoded(image: &[u8]) -> String {
    STANDARD.encode(image)
}

pub(crate) fn explanation(image: &[u8]) -> ExplainResponse {
    ExplainResponse {
        explanation_image_base64: Some(encoded(image)),
        ..ExplainResponse::default()
    }
}

pub(crate) fn status_error(status: u16, detail: Option<&str>) -> ServiceError {
    ServiceError::Status {
        status,
        detail: detail.map(str::to_string),
    }
}
