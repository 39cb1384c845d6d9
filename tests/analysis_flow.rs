use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;

use medscan::config::Config;
use medscan::provider::{CompletionProvider, ImagePayload, LlmError};
use medscan::server::Server;

#[derive(Debug, Clone)]
enum RecordedCall {
    Vision { prompt: String, data_uri: String },
    Text { prompt: String },
}

/// Deterministic stand-in for the live API. Vision responses are served
/// from a queue so consecutive analyses can return different reports.
struct StubProvider {
    vision_responses: Mutex<VecDeque<String>>,
    text_response: String,
    calls: Mutex<Vec<RecordedCall>>,
}

impl StubProvider {
    fn new(vision_responses: &[&str], text_response: &str) -> Arc<Self> {
        Arc::new(Self {
            vision_responses: Mutex::new(
                vision_responses.iter().map(|s| s.to_string()).collect(),
            ),
            text_response: text_response.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn text_call_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RecordedCall::Text { .. }))
            .count()
    }
}

#[async_trait]
impl CompletionProvider for StubProvider {
    async fn vision_completion(
        &self,
        _model: &str,
        prompt: &str,
        image: &ImagePayload,
        _max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall::Vision {
            prompt: prompt.to_string(),
            data_uri: image.data_uri.clone(),
        });
        self.vision_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyResponse)
    }

    async fn text_completion(
        &self,
        _model: &str,
        prompt: &str,
        _max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall::Text {
            prompt: prompt.to_string(),
        });
        Ok(self.text_response.clone())
    }
}

async fn start_server(port: u16, provider: Arc<StubProvider>) -> Client {
    let mut config = Config::default();
    config.server.port = port;
    config.server.bind = "127.0.0.1".to_string();

    let server = Server::with_provider(&config, provider);
    tokio::spawn(async move {
        let _: anyhow::Result<()> = server.run().await;
    });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(300)).await;

    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

async fn upload_image(client: &Client, port: u16, filename: &str, session_id: Option<&str>) -> reqwest::Response {
    let mut form = Form::new().part(
        "image",
        Part::bytes(b"fake image bytes".to_vec()).file_name(filename.to_string()),
    );
    if let Some(id) = session_id {
        form = form.text("session_id", id.to_string());
    }

    client
        .post(format!("http://127.0.0.1:{}/api/upload", port))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_upload_analyze_simplify_scenario() {
    let port = 38411;
    let provider = StubProvider::new(
        &["Finding: normal. Consult with a doctor before making decisions."],
        "It looks okay! Ask your doctor to be sure.",
    );
    let client = start_server(port, provider.clone()).await;

    // Upload scan.jpg
    let resp = upload_image(&client, port, "scan.jpg", None).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert_eq!(body["phase"], "image_uploaded");
    assert_eq!(body["filename"], "scan.jpg");

    // Analyze: displayed result is the upstream text verbatim
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/analyze", port))
        .json(&json!({"session_id": session_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["phase"], "report_shown");
    assert_eq!(
        body["report"],
        "Finding: normal. Consult with a doctor before making decisions."
    );

    // Selecting "No" never invokes the simplifier
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/simplify", port))
        .json(&json!({"session_id": session_id, "choice": "no"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(provider.text_call_count(), 0);

    // Selecting "Yes" returns the simplified text verbatim
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/simplify", port))
        .json(&json!({"session_id": session_id, "choice": "yes"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["phase"], "simplified_shown");
    assert_eq!(body["simplified"], "It looks okay! Ask your doctor to be sure.");
    assert_eq!(provider.text_call_count(), 1);

    // The upstream request embeds the report in the ELI5 instruction
    let calls = provider.calls();
    let text_prompt = calls
        .iter()
        .find_map(|c| match c {
            RecordedCall::Text { prompt } => Some(prompt.clone()),
            _ => None,
        })
        .unwrap();
    assert!(text_prompt.starts_with("Explain this like I'm 5 years old:"));
    assert!(text_prompt.contains("Finding: normal. Consult with a doctor before making decisions."));

    // The vision request carried the fixed instruction and a jpeg data URI
    let (vision_prompt, data_uri) = calls
        .iter()
        .find_map(|c| match c {
            RecordedCall::Vision { prompt, data_uri } => Some((prompt.clone(), data_uri.clone())),
            _ => None,
        })
        .unwrap();
    assert!(vision_prompt.contains("Consult with a doctor before making decisions"));
    assert!(vision_prompt.contains("Unable to determine based on image"));
    assert!(data_uri.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn test_second_analysis_overwrites_report() {
    let port = 38412;
    let provider = StubProvider::new(&["first report", "second report"], "simple");
    let client = start_server(port, provider).await;

    let resp = upload_image(&client, port, "scan.jpg", None).await;
    let body: serde_json::Value = resp.json().await.unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let analyze = |sid: String| {
        let client = client.clone();
        async move {
            client
                .post(format!("http://127.0.0.1:{}/api/analyze", port))
                .json(&json!({"session_id": sid}))
                .send()
                .await
                .unwrap()
        }
    };

    let resp = analyze(session_id.clone()).await;
    assert_eq!(resp.status(), 200);

    // New upload into the same session, then a second analysis
    let resp = upload_image(&client, port, "scan2.png", Some(&session_id)).await;
    assert_eq!(resp.status(), 200);

    let resp = analyze(session_id.clone()).await;
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("http://127.0.0.1:{}/api/session", port))
        .query(&[("session_id", session_id.as_str())])
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["report"], "second report");
    assert_eq!(body["phase"], "report_shown");
}

#[tokio::test]
async fn test_stale_report_survives_new_upload() {
    let port = 38413;
    let provider = StubProvider::new(&["old report"], "simple");
    let client = start_server(port, provider).await;

    let resp = upload_image(&client, port, "scan.jpg", None).await;
    let body: serde_json::Value = resp.json().await.unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("http://127.0.0.1:{}/api/analyze", port))
        .json(&json!({"session_id": session_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Replace the upload without re-analyzing
    upload_image(&client, port, "scan2.jpg", Some(&session_id)).await;

    let resp = client
        .get(format!("http://127.0.0.1:{}/api/session", port))
        .query(&[("session_id", session_id.as_str())])
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["phase"], "image_uploaded");
    // Stale text stays visible until a new analysis completes
    assert_eq!(body["report"], "old report");
}

#[tokio::test]
async fn test_status_and_health() {
    let port = 38414;
    let provider = StubProvider::new(&[], "simple");
    let client = start_server(port, provider).await;

    let resp = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");

    let resp = client
        .get(format!("http://127.0.0.1:{}/api/status", port))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["vision_model"], "gpt-4o");
    assert_eq!(body["text_model"], "gpt-3.5-turbo");
    assert_eq!(body["active_sessions"], 0);
}
