//! HTTP API tests against a gateway bound to an ephemeral port

use std::collections::HashMap;
use std::sync::Arc;

use helpdesk_rag_adapters::{MockEmbedder, MockLlm, MockVectorStore};
use helpdesk_rag_core::{
    EmbeddingConfig, GatewayConfig, LlmConfig, LlmProvider, SourceId, VectorStoreConfig,
};
use helpdesk_rag_gateway::{run, AppState};

fn test_config() -> GatewayConfig {
    let mut collections = HashMap::new();
    collections.insert(SourceId::new("JIRA"), "jira".to_string());
    collections.insert(SourceId::new("ZENDESK"), "zendesk".to_string());
    GatewayConfig {
        embedding: EmbeddingConfig {
            dim: 8,
            provider_url: "http://localhost:9".into(),
            api_key: "test".into(),
            model: "text-embedding-3-small".into(),
        },
        vector_store: VectorStoreConfig {
            url: "http://localhost:9".into(),
            api_key: None,
            collections,
        },
        llm: LlmConfig {
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".into(),
            api_key: "test".into(),
            provider_url: None,
        },
        cache: Default::default(),
        pipeline: Default::default(),
        breaker: Default::default(),
        source_weights: HashMap::new(),
        clients: HashMap::new(),
    }
}

async fn spawn_gateway(store: MockVectorStore) -> (String, Arc<MockVectorStore>) {
    let store = Arc::new(store);
    let state = Arc::new(AppState::assemble(
        &test_config(),
        Arc::new(MockEmbedder::new(8)),
        store.clone(),
        Arc::new(MockLlm::new().with_text("served answer")),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        run(listener, state).await.unwrap();
    });
    (base, store)
}

fn seeded_store() -> MockVectorStore {
    MockVectorStore::new().with_point("jira", "j1", 0.9, "Printer jams", "https://jira/j1")
}

#[tokio::test]
async fn health_is_always_live() {
    let (base, _store) = spawn_gateway(seeded_store()).await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn ready_reflects_adapter_reachability() {
    let (base, store) = spawn_gateway(seeded_store()).await;

    let response = reqwest::get(format!("{base}/ready")).await.unwrap();
    assert_eq!(response.status(), 200);

    store.set_reachable(false);
    let response = reqwest::get(format!("{base}/ready")).await.unwrap();
    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["ready"], false);
}

#[tokio::test]
async fn query_returns_an_answer_with_citations() {
    let (base, _store) = spawn_gateway(seeded_store()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/query"))
        .json(&serde_json::json!({ "text": "why does the printer jam?", "mode": "concise" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["text"], "served answer");
    assert_eq!(body["metrics"]["cache_result"], "miss");
    assert_eq!(body["citations"][0]["title"], "Printer jams");
}

#[tokio::test]
async fn empty_question_maps_to_bad_request() {
    let (base, _store) = spawn_gateway(seeded_store()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/query"))
        .json(&serde_json::json!({ "text": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn stats_exposes_cache_counters_and_breakers() {
    let (base, _store) = spawn_gateway(seeded_store()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/query"))
        .json(&serde_json::json!({ "text": "printer jam" }))
        .send()
        .await
        .unwrap();

    let body: serde_json::Value = reqwest::get(format!("{base}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["cache"]["entries"], 1);
    assert_eq!(body["cache"]["misses"], 1);
    assert!(body["breakers"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn invalidate_drops_entries() {
    let (base, _store) = spawn_gateway(seeded_store()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/query"))
        .json(&serde_json::json!({ "text": "printer jam" }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{base}/invalidate"))
        .json(&serde_json::json!({ "all": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["removed"], 1);

    // Invalidation without a selector is a caller error
    let response = client
        .post(format!("{base}/invalidate"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn invalidate_by_source_drops_answers_citing_it() {
    let store = MockVectorStore::new()
        .with_point("jira", "j1", 0.9, "Printer jams", "https://jira/j1")
        .with_point("zendesk", "z1", 0.8, "Printer ticket", "https://support/z1");
    let (base, _store) = spawn_gateway(store).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/query"))
        .json(&serde_json::json!({ "text": "printer jam" }))
        .send()
        .await
        .unwrap();

    let response = client
        .post(format!("{base}/invalidate"))
        .json(&serde_json::json!({ "source": "JIRA" }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["removed"], 1);
}
