use serde_json::json;
use std::time::Duration;
use vocab_translator::{
    ErrorCategory, HttpTransport, RemoteErrorKind, TranslateRequest, TranslationConfig, Transport,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(words: &[&str]) -> TranslateRequest {
    TranslateRequest::new(
        words.iter().map(|w| w.to_string()).collect(),
        "en",
        "zh",
        &TranslationConfig::default(),
    )
}

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(5))
}

#[tokio::test]
async fn posts_camel_case_request_and_parses_translations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .and(body_partial_json(json!({
            "words": ["hello"],
            "sourceLang": "en",
            "targetLang": "zh",
            "settings": { "jsonFormat": true }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "translations": {
                "hello": {
                    "translation": "你好",
                    "definition": "a greeting used when meeting someone",
                    "exampleSource": "Hello, Tom!",
                    "exampleTarget": "你好，汤姆！"
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let results = transport()
        .post(&format!("{}/translate", server.uri()), &request(&["hello"]))
        .await
        .unwrap();

    let hello = &results["hello"];
    assert_eq!(hello.translation, "你好");
    assert_eq!(hello.example_target, "你好，汤姆！");
    assert!(hello.is_valid());
}

#[tokio::test]
async fn failure_envelope_carries_category_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "The model `llama-x` has been decommissioned",
            "errorCategory": "model"
        })))
        .mount(&server)
        .await;

    let err = transport()
        .post(&server.uri(), &request(&["hello"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind, RemoteErrorKind::Http);
    assert_eq!(err.status, Some(404));
    assert_eq!(err.category_hint.as_deref(), Some("model"));
    assert_eq!(err.category(), ErrorCategory::Model);
}

#[tokio::test]
async fn rate_limit_status_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429).set_body_string("Rate limit reached. Please try again in 2s"),
        )
        .mount(&server)
        .await;

    let err = transport()
        .post(&server.uri(), &request(&["hello"]))
        .await
        .unwrap_err();

    assert_eq!(err.status, Some(429));
    assert_eq!(err.category(), ErrorCategory::RateLimit);
    assert!(err.message.contains("try again in 2s"));
}

#[tokio::test]
async fn success_flag_false_is_an_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "invalid response: upstream returned nothing"
        })))
        .mount(&server)
        .await;

    let err = transport()
        .post(&server.uri(), &request(&["hello"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind, RemoteErrorKind::InvalidResponse);
    assert_eq!(err.category(), ErrorCategory::Parse);
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let err = HttpTransport::with_client(client)
        .post(&server.uri(), &request(&["hello"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind, RemoteErrorKind::Timeout);
    assert_eq!(err.category(), ErrorCategory::Network);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let err = transport()
        .post("http://127.0.0.1:9/translate", &request(&["hello"]))
        .await
        .unwrap_err();

    assert!(matches!(
        err.kind,
        RemoteErrorKind::Network | RemoteErrorKind::Timeout
    ));
    assert_eq!(err.category(), ErrorCategory::Network);
}
