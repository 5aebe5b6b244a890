use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, model: &str) -> EmbeddingConfig {
    let address = server.address();
    EmbeddingConfig {
        protocol: "http".to_string(),
        host: address.ip().to_string(),
        port: address.port(),
        model: model.to_string(),
        batch_size: 2,
        timeout_seconds: 5,
    }
}

async fn mount_tags(server: &MockServer, names: &[&str]) {
    let models: Vec<_> = names.iter().map(|name| json!({ "name": name })).collect();
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": models })))
        .mount(server)
        .await;
}

#[test]
fn client_configuration() {
    let config = EmbeddingConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        timeout_seconds: 10,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&EmbeddingConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1, "at least one attempt is always made");
}

#[test]
fn zero_batch_size_is_clamped() {
    let config = EmbeddingConfig {
        batch_size: 0,
        ..EmbeddingConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");
    assert_eq!(client.batch_size, 1);
}

#[tokio::test]
async fn embed_splits_requests_into_batches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "input": ["one", "two"] })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "embeddings": [[1.0, 0.0], [0.0, 1.0]] })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({ "input": ["three"] })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.5, 0.5]] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, "mini")).expect("client");
    let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    let embeddings = client.embed(&texts).expect("embed");

    assert_eq!(
        embeddings,
        vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]
    );
}

#[tokio::test]
async fn embed_of_nothing_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, "mini")).expect("client");
    assert!(client.embed(&[]).expect("embed").is_empty());
}

#[tokio::test]
async fn embed_rejects_short_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[1.0]] })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, "mini")).expect("client");
    let texts = vec!["a".to_string(), "b".to_string()];
    let err = client.embed(&texts).expect_err("count mismatch");
    assert!(format!("{:#}", err).contains("Mismatch"));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, "mini"))
        .expect("client")
        .with_retry_attempts(3);
    let err = client.embed(&["a".to_string()]).expect_err("404");
    assert!(format!("{:#}", err).contains("HTTP 404"));
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server, "mini"))
        .expect("client")
        .with_retry_attempts(2);
    assert!(client.embed(&["a".to_string()]).is_err());
}

#[tokio::test]
async fn validate_model_accepts_implicit_latest_tag() {
    let server = MockServer::start().await;
    mount_tags(&server, &["all-minilm:latest", "llama3:8b"]).await;

    let client = OllamaClient::new(&config_for(&server, "all-minilm")).expect("client");
    client.validate_model().expect("untagged name should match :latest");

    let client = OllamaClient::new(&config_for(&server, "llama3:8b")).expect("client");
    client.validate_model().expect("exact name should match");

    let client = OllamaClient::new(&config_for(&server, "missing")).expect("client");
    let err = client.validate_model().expect_err("unknown model");
    assert!(err.to_string().contains("missing"));
}

#[tokio::test(flavor = "multi_thread")]
async fn loader_probes_dimension() {
    let server = MockServer::start().await;
    mount_tags(&server, &["mini:latest"]).await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "embeddings": [[0.1, 0.2, 0.3]] })),
        )
        .mount(&server)
        .await;

    let loader = OllamaModelLoader::new(config_for(&server, "mini"));
    let model = loader.load().await.expect("model should load");

    assert_eq!(model.dimension(), 3);
    assert_eq!(model.name(), "mini");
    assert!(model.supports_concurrent_inference());
}

#[tokio::test(flavor = "multi_thread")]
async fn loader_reports_missing_model_as_unavailable() {
    let server = MockServer::start().await;
    mount_tags(&server, &["something-else:latest"]).await;

    let loader = OllamaModelLoader::new(config_for(&server, "mini"));
    let Err(err) = loader.load().await else {
        panic!("model is missing");
    };

    assert!(matches!(err, KbError::ModelUnavailable(_)), "got {:?}", err);
}
