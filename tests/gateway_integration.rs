//! Library-level tests of the knowledge engine and tool gateway, using the
//! offline hashing embedder and scripted generative backends.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use casanova::config::Config;
use casanova::embedding::HashingEmbedder;
use casanova::engine::{EngineState, KnowledgeEngine};
use casanova::error::{LlmError, NO_KNOWLEDGE_BASE_REPLY, UNAVAILABLE_REPLY};
use casanova::gateway::ToolGateway;
use casanova::llm::{CompletionRequest, TextGenerator};
use casanova::tools::frame_wisdom;
use casanova::transform::TextTransformer;

const GUIDE: &str = "Active listening means repeating back what your partner said.\n\n\
    When an argument starts, lower your voice and take a short walk together.\n\n\
    Quality time is a love language: put the phone away during dinner.\n\n\
    Apologies work best when they name the specific hurt.\n\n\
    Plants need water twice a week in summer.";

/// Records every request; replies with a fixed text or fails.
struct Recording {
    reply: Option<&'static str>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Recording {
    fn replying(reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl TextGenerator for Recording {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.reply {
            Some(text) => Ok(text.to_string()),
            None => Err(LlmError::Api {
                status: 503,
                body: "service unavailable".to_string(),
            }),
        }
    }
}

fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.knowledge.source_path = root.join("relationship_guide.md");
    config.knowledge.persist_dir = root.join("storage");
    config.chunking.max_tokens = 20;
    config
}

fn write_guide(config: &Config) {
    std::fs::write(&config.knowledge.source_path, GUIDE).unwrap();
}

fn engine(config: &Config, generator: Arc<Recording>) -> Arc<KnowledgeEngine> {
    Arc::new(KnowledgeEngine::new(
        config,
        Arc::new(HashingEmbedder::new(512)),
        generator,
    ))
}

fn gateway(config: &Config, engine: Arc<KnowledgeEngine>, generator: Arc<Recording>) -> ToolGateway {
    let transformer = Arc::new(TextTransformer::new(generator, &config.transform));
    ToolGateway::for_agent(engine, transformer, config).unwrap()
}

// ============ Setup ============

#[tokio::test]
async fn test_setup_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    write_guide(&config);
    let engine = engine(&config, Recording::replying("ok"));

    for _ in 0..3 {
        assert_eq!(engine.setup().await.unwrap(), EngineState::Ready);
    }
    assert_eq!(engine.setup_runs(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_setup_builds_once() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    write_guide(&config);
    let engine = engine(&config, Recording::replying("ok"));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.setup().await.unwrap() })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), EngineState::Ready);
    }
    assert_eq!(engine.setup_runs(), 1);
    assert_eq!(engine.state(), EngineState::Ready);
}

#[tokio::test]
async fn test_persisted_index_gives_same_passages_after_reload() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    write_guide(&config);
    let question = "what should we do when an argument starts?";

    let first_gen = Recording::replying("Take a walk together.");
    let first = engine(&config, first_gen.clone());
    first.setup().await.unwrap();
    first.query(question).await.unwrap();

    // A fresh process: the source is gone, only the persisted index remains.
    std::fs::remove_file(&config.knowledge.source_path).unwrap();
    let second_gen = Recording::replying("Take a walk together.");
    let second = engine(&config, second_gen.clone());
    assert_eq!(second.setup().await.unwrap(), EngineState::Ready);
    assert_eq!(second.passage_count(), first.passage_count());
    second.query(question).await.unwrap();

    assert_eq!(first_gen.prompts(), second_gen.prompts());
    assert!(first_gen.prompts()[0].contains("lower your voice"));
}

// ============ get_relationship_wisdom ============

#[tokio::test]
async fn test_wisdom_is_framed_answer() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    write_guide(&config);
    let generator = Recording::replying("  Name the specific hurt.  ");
    let engine = engine(&config, generator.clone());
    engine.setup().await.unwrap();
    let gw = gateway(&config, engine, generator.clone());

    let out = gw.get_relationship_wisdom("How do I apologize?").await;
    assert_eq!(out, frame_wisdom("Name the specific hurt."));

    let requests = generator.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!((requests[0].temperature - 0.1).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_degraded_mode_answers_with_disclaimer() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let generator = Recording::replying("never used");
    let engine = engine(&config, generator.clone());
    assert_eq!(engine.setup().await.unwrap(), EngineState::Degraded);
    let gw = gateway(&config, engine, generator.clone());

    for question in ["How do I apologize?", "What is love?"] {
        assert_eq!(
            gw.get_relationship_wisdom(question).await,
            frame_wisdom(NO_KNOWLEDGE_BASE_REPLY)
        );
    }
    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn test_generation_failure_answers_unavailable() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    write_guide(&config);
    let generator = Recording::failing();
    let engine = engine(&config, generator.clone());
    engine.setup().await.unwrap();
    let gw = gateway(&config, engine, generator);

    assert_eq!(
        gw.get_relationship_wisdom("How do I apologize?").await,
        frame_wisdom(UNAVAILABLE_REPLY)
    );
}

// ============ translate_and_spice ============

#[tokio::test]
async fn test_spice_returns_trimmed_generation() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let generator = Recording::replying("\n¡Eres la luz de mis días!\n");
    let engine = engine(&config, generator.clone());
    let gw = gateway(&config, engine, generator);

    assert_eq!(
        gw.translate_and_spice("you light up my days", None).await,
        "¡Eres la luz de mis días!"
    );
}

#[tokio::test]
async fn test_spice_falls_back_when_service_is_down() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let generator = Recording::failing();
    let engine = engine(&config, generator.clone());
    let gw = gateway(&config, engine, generator);

    for phrase in ["i love you", "I LOVE YOU", "  I Love You "] {
        let out = gw.translate_and_spice(phrase, Some("sweet")).await;
        assert!(out.contains("Te amo"), "{:?} -> {}", phrase, out);
    }

    let out = gw.translate_and_spice("you make me laugh", None).await;
    assert!(out.contains("you make me laugh"));
}

#[tokio::test]
async fn test_style_reaches_the_instruction() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let generator = Recording::replying("Hola");
    let engine = engine(&config, generator.clone());
    let gw = gateway(&config, engine, generator.clone());

    gw.translate_and_spice("good morning", Some("shakespearean"))
        .await;
    gw.translate_and_spice("good morning", None).await;
    gw.translate_and_spice("good morning", Some("POETIC")).await;

    let prompts = generator.prompts();
    assert!(prompts[0].contains("The style should be: shakespearean"));
    assert!(prompts[1].contains("The style should be: passionate"));
    assert!(prompts[2].contains("The style should be: poetic"));

    let requests = generator.requests.lock().unwrap();
    assert_eq!(requests[0].max_tokens, 150);
    assert!((requests[0].temperature - 0.9).abs() < f32::EPSILON);
}

// ============ Never raises ============

#[tokio::test]
async fn test_gateway_always_returns_text() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let generator = Recording::failing();
    let engine = engine(&config, generator.clone());
    let gw = gateway(&config, engine, generator);

    let calls: Vec<(&str, Value)> = vec![
        ("no_such_tool", json!({})),
        ("translate_and_spice", json!({})),
        ("translate_and_spice", json!({ "text": 42 })),
        ("translate_and_spice", Value::Null),
        ("translate_and_spice", json!("just a string")),
        ("get_relationship_wisdom", json!({})),
        ("get_relationship_wisdom", json!({ "question": "" })),
        ("get_relationship_wisdom", json!({ "question": "Before setup?" })),
    ];

    for (name, params) in calls {
        let out = gw.invoke(name, params.clone()).await;
        assert!(!out.trim().is_empty(), "{} {} returned empty", name, params);
    }
}

#[tokio::test]
async fn test_invalid_wisdom_calls_stay_framed() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let generator = Recording::replying("never used");
    let engine = engine(&config, generator.clone());
    let gw = gateway(&config, engine, generator);

    for params in [
        json!({}),
        json!({ "question": "   " }),
        json!({ "question": 7 }),
        Value::Null,
    ] {
        assert_eq!(
            gw.invoke("get_relationship_wisdom", params).await,
            frame_wisdom(UNAVAILABLE_REPLY)
        );
    }
}

/// Never answers within any test's patience.
struct Stalled;

#[async_trait]
impl TextGenerator for Stalled {
    fn model_name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("too late".to_string())
    }
}

fn stalled_gateway(config: &Config) -> (ToolGateway, Arc<KnowledgeEngine>) {
    let generator: Arc<dyn TextGenerator> = Arc::new(Stalled);
    let engine = Arc::new(KnowledgeEngine::new(
        config,
        Arc::new(HashingEmbedder::new(512)),
        Arc::clone(&generator),
    ));
    let transformer = Arc::new(TextTransformer::new(generator, &config.transform));
    let gw = ToolGateway::for_agent(Arc::clone(&engine), transformer, config).unwrap();
    (gw, engine)
}

#[tokio::test]
async fn test_slow_service_answers_in_character() {
    let tmp = TempDir::new().unwrap();
    let mut config = config(tmp.path());
    config.transform.timeout_secs = 1;
    config.gateway.tool_timeout_secs = 2;
    write_guide(&config);
    let (gw, engine) = stalled_gateway(&config);
    engine.setup().await.unwrap();

    let out = gw.translate_and_spice("i love you", None).await;
    assert!(out.contains("Te amo"), "{}", out);

    assert_eq!(
        gw.get_relationship_wisdom("How do I apologize?").await,
        frame_wisdom(UNAVAILABLE_REPLY)
    );
}

#[tokio::test]
async fn test_tool_timeout_uses_phrasebook() {
    let tmp = TempDir::new().unwrap();
    let mut config = config(tmp.path());
    // The gateway gives up before the transformer does.
    config.transform.timeout_secs = 30;
    config.gateway.tool_timeout_secs = 1;
    let (gw, _engine) = stalled_gateway(&config);

    let out = gw.translate_and_spice("I LOVE YOU", Some("poetic")).await;
    assert!(out.contains("Te amo"), "{}", out);

    let out = gw.translate_and_spice("you make me laugh", None).await;
    assert!(out.contains("you make me laugh"), "{}", out);
}

// ============ HTTP ============

#[tokio::test]
async fn test_http_server_answers_in_band() {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    let generator = Recording::failing();
    let engine = engine(&config, generator.clone());
    engine.setup().await.unwrap();
    let gw = gateway(&config, Arc::clone(&engine), generator);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_handle = tokio::spawn(casanova::server::serve(listener, gw, engine));
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["knowledge"], "degraded");

    let list: Value = client
        .get(format!("{}/tools/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["tools"].as_array().unwrap().len(), 2);

    let resp = client
        .post(format!("{}/tools/translate_and_spice", base))
        .json(&json!({ "text": "I miss you" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], "Sin ti, mi corazón es un jardín sin flores");

    let resp = client
        .post(format!("{}/tools/get_relationship_wisdom", base))
        .json(&json!({ "question": "How do I apologize?" }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], frame_wisdom(NO_KNOWLEDGE_BASE_REPLY));

    for (path, payload) in [
        ("/tools/serenade", "{}"),
        ("/tools/translate_and_spice", "{not json"),
    ] {
        let resp = client
            .post(format!("{}{}", base, path))
            .header("content-type", "application/json")
            .body(payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert!(!body["result"].as_str().unwrap().is_empty());
    }

    let resp = client
        .post(format!("{}/tools/get_relationship_wisdom", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], frame_wisdom(UNAVAILABLE_REPLY));

    server_handle.abort();
}
