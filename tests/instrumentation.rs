//! End-to-end instrumentation tests against a live server.

use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

use txn_agent::http::outbound;
use txn_agent::http::OutboundClient;
use txn_agent::current_transaction;

mod common;

use common::TRANSACTION_HEADER;

async fn assert_hello_scenario(tls: bool) {
    let agent = common::test_agent();
    let (addr, shutdown) = if tls {
        common::spawn_tls_server(&agent, common::hello_app()).await
    } else {
        common::spawn_server(&agent, common::hello_app()).await
    };
    let scheme = if tls { "https" } else { "http" };

    assert!(current_transaction().is_none());

    let response = common::client()
        .get(format!("{scheme}://{addr}/hello/friend"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()[TRANSACTION_HEADER],
        "WebTransaction/Uri/hello/friend"
    );
    assert!(response.headers().contains_key("x-request-id"));
    let body: String = response.json().await.unwrap();
    assert_eq!(body, "hello friend");

    assert!(current_transaction().is_none());
    assert_eq!(
        common::wait_for_metric(&agent, "WebTransaction/Uri/hello/friend", 1).await,
        1
    );
    assert_eq!(agent.metrics().error_count("WebTransaction/Uri/hello/friend"), 0);

    let environment = agent.environment().to_list();
    assert!(environment.contains(&("Dispatcher".to_string(), "axum".to_string())));
    assert!(environment.contains(&("Framework".to_string(), "axum".to_string())));

    shutdown.trigger();
}

#[tokio::test]
async fn test_hello_scenario() {
    assert_hello_scenario(false).await;
}

#[tokio::test]
async fn test_hello_scenario_over_tls() {
    assert_hello_scenario(true).await;
}

#[tokio::test]
async fn test_each_request_counts_once() {
    let agent = common::test_agent();
    let (addr, shutdown) = common::spawn_server(&agent, common::hello_app()).await;
    let client = common::client();

    for _ in 0..3 {
        let response = client
            .get(format!("http://{addr}/hello/friend?greeting=hi"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "\"hello friend\"");
    }

    assert_eq!(
        common::wait_for_metric(&agent, "WebTransaction/Uri/hello/friend", 3).await,
        3
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        agent
            .metrics()
            .get_metric("WebTransaction/Uri/hello/friend")
            .unwrap()
            .stats
            .call_count,
        3
    );
    shutdown.trigger();
}

#[derive(Clone)]
struct RelayState {
    client: OutboundClient,
    backend: String,
}

async fn relay(State(state): State<RelayState>) -> Json<Value> {
    let before = current_transaction().map(|t| t.name().to_string());
    let during = outbound::call(async { current_transaction().is_some() }).await;
    let (status, body) = state.client.get(&state.backend).await.unwrap();
    let after = current_transaction().map(|t| t.name().to_string());

    Json(json!({
        "before": before,
        "during": during,
        "after": after,
        "backend_status": status.as_u16(),
        "backend_body": String::from_utf8_lossy(&body),
    }))
}

async fn slow_backend() -> &'static str {
    tokio::time::sleep(Duration::from_millis(30)).await;
    if current_transaction().is_some() {
        "bound"
    } else {
        "unbound"
    }
}

#[tokio::test]
async fn test_outbound_calls_run_without_transaction() {
    let backend = common::spawn_backend(Router::new().route("/slow", get(slow_backend))).await;

    let agent = common::test_agent();
    let app = Router::new().route("/relay", get(relay)).with_state(RelayState {
        client: agent.outbound_client(),
        backend: format!("http://{backend}/slow"),
    });
    let (addr, shutdown) = common::spawn_server(&agent, app).await;

    let body: Value = common::client()
        .get(format!("http://{addr}/relay"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["before"], "WebTransaction/Uri/relay");
    assert_eq!(body["during"], false);
    assert_eq!(body["after"], "WebTransaction/Uri/relay");
    assert_eq!(body["backend_status"], 200);
    assert_eq!(body["backend_body"], "unbound");

    assert_eq!(common::wait_for_metric(&agent, "WebTransaction/Uri/relay", 1).await, 1);
    let stats = agent.metrics().get_metric("WebTransaction/Uri/relay").unwrap().stats;
    assert!(stats.total - stats.total_exclusive >= Duration::from_millis(30));
    assert!(agent.metrics().get_metric("WebTransaction/Uri/slow").is_none());

    shutdown.trigger();
}

#[tokio::test]
async fn test_server_errors_are_recorded_as_errored() {
    let agent = common::test_agent();
    let app = Router::new().route(
        "/boom",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let (addr, shutdown) = common::spawn_server(&agent, app).await;

    let response = common::client()
        .get(format!("http://{addr}/boom"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "boom");

    assert_eq!(common::wait_for_metric(&agent, "WebTransaction/Uri/boom", 1).await, 1);
    assert_eq!(agent.metrics().error_count("WebTransaction/Uri/boom"), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_head_request_is_completed() {
    let agent = common::test_agent();
    let (addr, shutdown) = common::spawn_server(&agent, common::hello_app()).await;

    let response = common::client()
        .head(format!("http://{addr}/hello/friend"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()[TRANSACTION_HEADER],
        "WebTransaction/Uri/hello/friend"
    );

    assert_eq!(
        common::wait_for_metric(&agent, "WebTransaction/Uri/hello/friend", 1).await,
        1
    );
    assert_eq!(agent.metrics().error_count("WebTransaction/Uri/hello/friend"), 0);
    shutdown.trigger();
}

#[tokio::test]
async fn test_unmatched_route_is_still_a_transaction() {
    let agent = common::test_agent();
    let (addr, shutdown) = common::spawn_server(&agent, common::hello_app()).await;

    let response = common::client()
        .get(format!("http://{addr}//missing//page/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    assert_eq!(
        common::wait_for_metric(&agent, "WebTransaction/Uri/missing/page", 1).await,
        1
    );
    assert_eq!(agent.metrics().error_count("WebTransaction/Uri/missing/page"), 0);
    shutdown.trigger();
}

#[tokio::test]
async fn test_disabled_agent_serves_uninstrumented() {
    let agent = common::disabled_agent();
    let (addr, shutdown) = common::spawn_server(&agent, common::hello_app()).await;

    let response = common::client()
        .get(format!("http://{addr}/hello/friend"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()[TRANSACTION_HEADER], "none");
    let body: String = response.json().await.unwrap();
    assert_eq!(body, "hello friend");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(agent.metrics().is_empty());
    assert!(agent.environment().is_empty());
    shutdown.trigger();
}
