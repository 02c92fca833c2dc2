use serde_json::json;
use std::time::Duration;
use stepline::core::yaml_layer::{
    ActionKind, ArgValue, HttpStepClient, StepApiClient, StepApiError, StepRequest,
};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, token: Option<&str>) -> HttpStepClient {
    HttpStepClient::new(
        &format!("{}/api", server.uri()),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .expect("client")
}

fn click_request(checkpoint: &str, position: u32) -> StepRequest {
    StepRequest {
        checkpoint_id: checkpoint.to_string(),
        position,
        action: ActionKind::Click,
        args: vec![ArgValue::text("#login")],
        payload: json!({"action": "CLICK", "selector": "#login"}),
    }
}

#[tokio::test]
async fn posts_the_step_envelope_with_a_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/teststeps"))
        .and(query_param("envelope", "false"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_json(json!({
            "checkpointId": 1680,
            "stepIndex": 3,
            "parsedStep": {"action": "CLICK", "selector": "#login"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"item": {"id": 9001}})))
        .expect(1)
        .mount(&server)
        .await;

    let created = client(&server, Some("secret-token"))
        .create_step(&click_request("1680", 3))
        .await
        .expect("created");
    assert_eq!(created.id, Some(9001));
    assert_eq!(created.output, None);
}

#[tokio::test]
async fn zero_identifier_is_reported_as_missing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/teststeps"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"item": {"id": 0, "output": "A-17"}})),
        )
        .mount(&server)
        .await;

    let created = client(&server, None)
        .create_step(&click_request("1680", 1))
        .await
        .expect("created");
    assert_eq!(created.id, None);
    assert_eq!(created.output, Some(json!("A-17")));
}

#[tokio::test]
async fn error_statuses_map_to_error_kinds() {
    let cases = [
        (404, "not-found"),
        (422, "validation"),
        (401, "unauthorized"),
        (503, "transient"),
    ];
    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/teststeps"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = client(&server, None)
            .create_step(&click_request("1680", 1))
            .await
            .expect_err("error status");
        assert_eq!(err.kind(), expected, "status {}", status);
        assert!(err.to_string().contains("nope"));
    }
}

#[tokio::test]
async fn unreachable_servers_are_transient() {
    let server = MockServer::start().await;
    let client = client(&server, None);
    drop(server);

    let err = client
        .create_step(&click_request("1680", 1))
        .await
        .expect_err("connection refused");
    assert!(matches!(err, StepApiError::Transient(_)));
    assert!(err.is_transient());
}

#[test]
fn invalid_base_urls_are_configuration_errors() {
    let err = HttpStepClient::new("not a url", None, Duration::from_secs(1))
        .err()
        .expect("invalid url");
    assert_eq!(err.category.to_string(), "ConfigError");
}
