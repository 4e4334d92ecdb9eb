//! API Module
//!
//! HTTP API layer for the controller.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod fleet;
pub mod health;
pub mod job;
pub mod runner;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Create the main API router with all endpoints
///
/// Handlers read the peer address, so the router must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Runner endpoints
        .route(
            "/heartbeat",
            get(runner::heartbeat).post(runner::heartbeat),
        )
        .route("/runners", get(runner::list_runners))
        // Job endpoints
        .route("/jobs", get(job::list_jobs).post(job::create_job))
        .route("/job/result", post(job::report_result))
        // Fleet endpoints
        .route("/register-hybrid", post(fleet::register_hybrid))
        .route("/metrics", get(fleet::metrics))
        // Add state and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Method, Request, StatusCode};
    use tcr_core::domain::job::{JobOutcome, JobStatus};
    use tower::ServiceExt;

    use crate::service::autoscaler::FleetProvisioner;
    use crate::service::dispatcher::tests::RecordingSender;
    use crate::service::dispatcher::{DispatchConfig, DispatchOutcome, Dispatcher};
    use crate::service::metrics::{Metrics, sample};
    use crate::service::queue::JobQueue;
    use crate::service::registry::RunnerRegistry;

    struct AlwaysUp;

    #[async_trait]
    impl FleetProvisioner for AlwaysUp {
        async fn scale_up_one(&self) -> tcr_client::Result<()> {
            Ok(())
        }

        async fn scale_down(&self, _count: u32) -> tcr_client::Result<bool> {
            Ok(false)
        }
    }

    struct TestApp {
        router: Router,
        state: AppState,
        sender: Arc<RecordingSender>,
    }

    fn app(provisioner: Option<Arc<dyn FleetProvisioner>>) -> TestApp {
        let queue = Arc::new(JobQueue::new());
        let registry = Arc::new(RunnerRegistry::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let sender = Arc::new(RecordingSender::default());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            sender.clone(),
            Arc::clone(&metrics),
            DispatchConfig {
                send_timeout: Duration::from_millis(200),
                max_attempts: 3,
            },
        ));
        let state = AppState::new(queue, registry, dispatcher, metrics, provisioner);
        let router = create_router(state.clone()).layer(MockConnectInfo(SocketAddr::from((
            [10, 0, 0, 5],
            40000,
        ))));

        TestApp {
            router,
            state,
            sender,
        }
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(None);
        let response = app.router.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_heartbeat_uses_peer_address() {
        let app = app(None);

        let response = app
            .router
            .clone()
            .oneshot(get_request("/heartbeat?id=r1&port=9000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let runner = app.state.registry.get("r1").unwrap();
        assert_eq!(runner.address, std::net::IpAddr::from([10, 0, 0, 5]));
        assert_eq!(runner.port, 9000);

        // POST works too and the port defaults to 8081
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/heartbeat?id=r2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.state.registry.get("r2").unwrap().port, 8081);
    }

    #[tokio::test]
    async fn test_heartbeat_from_ipv6_peer() {
        let app = app(None);
        let peer: SocketAddr = "[fd00::7]:40000".parse().unwrap();
        let router = create_router(app.state.clone()).layer(MockConnectInfo(peer));

        let response = router
            .oneshot(get_request("/heartbeat?id=r6&port=9000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["address"], "fd00::7");

        let runner = app.state.registry.get("r6").unwrap();
        assert_eq!(runner.endpoint(), "http://[fd00::7]:9000");
    }

    #[tokio::test]
    async fn test_heartbeat_rejects_bad_query() {
        let app = app(None);

        for uri in ["/heartbeat", "/heartbeat?id=", "/heartbeat?id=r1&port=abc"] {
            let response = app.router.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body_json(response).await["error"].is_string());
        }
        assert!(app.state.registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_job_intake_and_duplicate() {
        let app = app(None);
        let body = serde_json::json!({
            "id": "J1",
            "action": "queued",
            "repo_owner": "octo",
            "repo_name": "repo",
            "job_name": "build",
            "extra": "ignored"
        });

        let response = app
            .router
            .clone()
            .oneshot(json_request(Method::POST, "/jobs", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["status"], "queued");

        let response = app
            .router
            .clone()
            .oneshot(json_request(Method::POST, "/jobs", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.router.oneshot(get_request("/jobs")).await.unwrap();
        let jobs = body_json(response).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
        assert_eq!(
            app.state.metrics.value(r#"tcr_jobs_total{status="queued"}"#),
            1.0
        );
    }

    #[tokio::test]
    async fn test_result_rejects_unknown_status() {
        let app = app(None);
        let response = app
            .router
            .oneshot(json_request(
                Method::POST,
                "/job/result",
                serde_json::json!({ "id": "J1", "status": "exploded", "runner_id": "r1" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_result_for_unknown_job_is_acknowledged() {
        let app = app(None);
        let response = app
            .router
            .oneshot(json_request(
                Method::POST,
                "/job/result",
                serde_json::json!({ "id": "ghost", "status": "success", "runner_id": "r1" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["applied"], false);
    }

    #[tokio::test]
    async fn test_register_hybrid() {
        let unconfigured = app(None);
        let response = unconfigured
            .router
            .oneshot(json_request(Method::POST, "/register-hybrid", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let configured = app(Some(Arc::new(AlwaysUp)));
        let response = configured
            .router
            .oneshot(json_request(Method::POST, "/register-hybrid", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(configured.state.metrics.value("tcr_scale_up_total"), 1.0);
    }

    #[tokio::test]
    async fn test_end_to_end_dispatch_and_result() {
        let app = app(None);

        // Job J1 arrives, runner R1 checks in
        let response = app
            .router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/jobs",
                serde_json::json!({
                    "id": "J1",
                    "repo_owner": "octo",
                    "repo_name": "repo",
                    "job_name": "build"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        app.router
            .clone()
            .oneshot(get_request("/heartbeat?id=R1&port=8081"))
            .await
            .unwrap();

        // One sweep sends exactly one job to R1
        let outcomes = app.state.dispatcher.sweep();
        assert_eq!(
            outcomes,
            vec![DispatchOutcome::Claimed {
                job_id: "J1".to_string(),
                runner_id: "R1".to_string()
            }]
        );
        app.state.dispatcher.drain().await;
        assert_eq!(
            *app.sender.sent.lock(),
            vec![("J1".to_string(), "R1".to_string())]
        );
        assert!(app.state.registry.get("R1").unwrap().busy);

        // R1 reports success
        let response = app
            .router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/job/result",
                serde_json::json!({ "id": "J1", "status": "success", "runner_id": "R1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["applied"], true);

        let job = app.state.queue.get("J1").unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.outcome, Some(JobOutcome::Success));
        assert!(!app.state.registry.get("R1").unwrap().busy);

        // The fast path ran once and found nothing to send
        tokio::time::timeout(Duration::from_secs(5), async {
            while app.state.metrics.value("tcr_fast_path_runs_total") == 0.0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(app.sender.sent.lock().len(), 1);

        let response = app.router.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let rendered = String::from_utf8(bytes.to_vec()).unwrap();

        assert_eq!(sample(&rendered, r#"tcr_jobs_total{status="queued"}"#), 1.0);
        assert_eq!(sample(&rendered, r#"tcr_jobs_total{status="dispatched"}"#), 1.0);
        assert_eq!(sample(&rendered, r#"tcr_jobs_total{status="success"}"#), 1.0);
        assert_eq!(sample(&rendered, "tcr_job_duration_seconds_count"), 1.0);
        assert_eq!(sample(&rendered, "tcr_jobs_in_queue"), 0.0);
        assert_eq!(sample(&rendered, "tcr_runners_total"), 1.0);
        assert_eq!(sample(&rendered, "tcr_runners_idle"), 1.0);
    }
}
