//! HttpDownstream against a local stub of the answering service

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use quotagate::downstream::{Downstream, DownstreamError, DownstreamRequest, HttpDownstream};
use quotagate::quota::Identity;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Received = Arc<Mutex<Vec<Value>>>;

/// Spawn a stub that records bodies and answers based on the question
async fn spawn_stub() -> (SocketAddr, Received) {
    let received: Received = Arc::default();

    async fn ask(State(received): State<Received>, Json(body): Json<Value>) -> (StatusCode, String) {
        received.lock().unwrap().push(body.clone());
        match body["question"].as_str() {
            Some("fail") => (
                StatusCode::BAD_GATEWAY,
                json!({ "success": false, "message": "Model is overloaded" }).to_string(),
            ),
            Some("garbage") => (StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>".to_string()),
            Some("slow") => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                (StatusCode::OK, "{}".to_string())
            }
            _ => (
                StatusCode::OK,
                json!({ "success": true, "answer": "Shipping every day." }).to_string(),
            ),
        }
    }

    let app = Router::new()
        .route("/ask", post(ask))
        .with_state(received.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, received)
}

fn request(question: &str, credential: Option<&str>) -> DownstreamRequest {
    DownstreamRequest {
        identity: Identity::from("amjad"),
        prompt: question.to_string(),
        history: vec!["hello".to_string(), "hi there".to_string()],
        bio: "CEO".to_string(),
        roles: vec!["founder".to_string(), "ceo".to_string()],
        credential: credential.map(str::to_string),
    }
}

fn client(addr: SocketAddr, timeout: Duration) -> HttpDownstream {
    HttpDownstream::new(format!("http://{}/ask", addr), "shh", timeout).unwrap()
}

#[tokio::test]
async fn success_body_is_returned_verbatim() {
    let (addr, received) = spawn_stub().await;
    let downstream = client(addr, Duration::from_secs(5));

    let response = downstream
        .ask(&request("What are you building?", Some("sk-own")))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        response.body,
        json!({ "success": true, "answer": "Shipping every day." })
    );

    let sent = received.lock().unwrap()[0].clone();
    assert_eq!(
        sent,
        json!({
            "question": "What are you building?",
            "secret": "shh",
            "bio": "CEO",
            "username": "amjad",
            "history": ["hello", "hi there"],
            "roles": "founder, ceo",
            "apiKey": "sk-own",
        })
    );
}

#[tokio::test]
async fn failure_status_surfaces_message() {
    let (addr, _) = spawn_stub().await;
    let downstream = client(addr, Duration::from_secs(5));

    let err = downstream.ask(&request("fail", None)).await.unwrap_err();

    assert!(matches!(err, DownstreamError::Status { status: 502, .. }));
    assert_eq!(err.message(), Some("Model is overloaded"));
}

#[tokio::test]
async fn failure_without_json_has_no_message() {
    let (addr, _) = spawn_stub().await;
    let downstream = client(addr, Duration::from_secs(5));

    let err = downstream.ask(&request("garbage", None)).await.unwrap_err();

    assert!(matches!(err, DownstreamError::Status { status: 500, message: None }));
    assert_eq!(err.message(), None);
}

#[tokio::test]
async fn slow_service_times_out() {
    let (addr, _) = spawn_stub().await;
    let downstream = client(addr, Duration::from_millis(100));

    let err = downstream.ask(&request("slow", None)).await.unwrap_err();

    assert!(matches!(err, DownstreamError::Timeout(_)));
}

#[tokio::test]
async fn unreachable_service_is_transport_error() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let downstream = client(addr, Duration::from_secs(2));
    let err = downstream.ask(&request("anyone?", None)).await.unwrap_err();

    assert!(matches!(err, DownstreamError::Transport(_)));
}
