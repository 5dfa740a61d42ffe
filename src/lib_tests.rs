#[cfg(test)]
mod tests {
    use crate::credentials::{Credential, CredentialStore};
    use crate::oci::client::tests::FakeRegistryClient;
    use crate::oci::pool::tests::FakeConnector;
    use crate::oci::RegistryError;
    use crate::settings::Settings;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: AppState,
    }

    fn test_app(settings: Settings, clients: Vec<Arc<FakeRegistryClient>>) -> TestApp {
        let credentials = CredentialStore::from_credentials(
            clients
                .iter()
                .map(|c| (c.host.clone(), Credential::new("robot", "secret"))),
        );
        let connector = clients
            .into_iter()
            .fold(FakeConnector::default(), FakeConnector::with_client);

        let state = AppState::with_connector(&settings, credentials, Arc::new(connector));
        TestApp {
            router: crate::app(state.clone(), Duration::from_secs(5)),
            state,
        }
    }

    fn pod(image: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web", "labels": { "app": "web" } },
            "spec": { "containers": [{ "name": "web", "image": image }] }
        })
    }

    async fn post(router: &Router, body: impl Into<Body>) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn post_pod(router: &Router, image: &str) -> (StatusCode, Value) {
        post(router, pod(image).to_string()).await
    }

    #[tokio::test]
    async fn test_ping() {
        let app = test_app(Settings::default(), vec![]);

        let response = app
            .router
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_bare_image_name_uses_library_namespace() {
        let app = test_app(Settings::default(), vec![]);

        let image = app.state.resolver.parse("nginx:1.21").unwrap();

        assert_eq!(image.host, "docker.io");
        assert_eq!(image.repository, "library/nginx");
        assert_eq!(image.reference.as_str(), "1.21");
    }

    #[tokio::test]
    async fn test_invalid_labels_are_filtered_from_response() {
        let registry = Arc::new(FakeRegistryClient::with_labels(
            "registry.example.com",
            &[("valid.io/team", "infra"), ("Invalid Key!!", "x")],
        ));
        let app = test_app(Settings::default(), vec![registry]);

        let (status, body) = post_pod(&app.router, "registry.example.com/team/app:v1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "labels": { "valid.io/team": "infra" } }));
    }

    #[tokio::test]
    async fn test_invalid_json_body_fails_without_crashing() {
        let app = test_app(Settings::default(), vec![]);

        let (status, body) = post(&app.router, "{\"spec\": ").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());

        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_same_image_twice_fetches_once() {
        let registry = Arc::new(FakeRegistryClient::with_labels(
            "docker.io",
            &[("maintainer", "nginx")],
        ));
        let app = test_app(Settings::default(), vec![registry.clone()]);

        let (first_status, first) = post_pod(&app.router, "nginx:1.21").await;
        let (second_status, second) = post_pod(&app.router, "nginx:1.21").await;

        assert_eq!(first_status, StatusCode::OK);
        assert_eq!(second_status, StatusCode::OK);
        assert_eq!(first, second);
        assert_eq!(first, json!({ "labels": { "maintainer": "nginx" } }));
        assert_eq!(registry.manifest_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let registry = Arc::new(FakeRegistryClient {
            delay: Duration::from_millis(50),
            ..FakeRegistryClient::with_labels("ghcr.io", &[("team", "platform")])
        });
        let app = test_app(Settings::default(), vec![registry.clone()]);

        let requests = (0..10).map(|_| post_pod(&app.router, "ghcr.io/org/api:2.0"));
        for (status, body) in futures::future::join_all(requests).await {
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "labels": { "team": "platform" } }));
        }

        assert_eq!(registry.manifest_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_image_is_request_failure() {
        let app = test_app(Settings::default(), vec![]);

        let (status, _) = post(
            &app.router,
            json!({ "metadata": { "name": "web" }, "spec": { "containers": [] } }).to_string(),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_malformed_reference_is_request_failure() {
        let app = test_app(Settings::default(), vec![]);

        let (status, body) = post_pod(&app.router, "nginx:").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("invalid image reference"));
    }

    #[tokio::test]
    async fn test_unknown_registry_yields_no_labels() {
        let app = test_app(Settings::default(), vec![]);

        let (status, body) = post_pod(&app.router, "quay.io/prometheus/node-exporter:v1.6.0").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "labels": {} }));
    }

    #[tokio::test]
    async fn test_known_registry_failures_map_to_gateway_errors() {
        let missing = Arc::new(FakeRegistryClient::failing(
            "missing.example.com",
            RegistryError::NotFound("app:v1".into()),
        ));
        let slow = Arc::new(FakeRegistryClient::failing(
            "slow.example.com",
            RegistryError::Timeout("app:v1".into()),
        ));
        let app = test_app(Settings::default(), vec![missing, slow]);

        let (status, _) = post_pod(&app.router, "missing.example.com/app:v1").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = post_pod(&app.router, "slow.example.com/app:v1").await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_fallback_answers_empty_for_failing_registry() {
        let mut settings = Settings::default();
        settings.registry.fallback_to_empty = true;
        let registry = Arc::new(FakeRegistryClient::failing(
            "registry.example.com",
            RegistryError::Unavailable("503 Service Unavailable".into()),
        ));
        let app = test_app(settings, vec![registry]);

        let (status, body) = post_pod(&app.router, "registry.example.com/app:v1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "labels": {} }));
    }

    #[tokio::test]
    async fn test_merge_pod_labels_prefers_image_labels() {
        let mut settings = Settings::default();
        settings.webhook.merge_pod_labels = true;
        let registry = Arc::new(FakeRegistryClient::with_labels(
            "registry.example.com",
            &[("app", "from-image"), ("team", "infra")],
        ));
        let app = test_app(settings, vec![registry]);

        let mut document = pod("registry.example.com/app:v1");
        document["metadata"]["labels"] = json!({ "app": "web", "tier": "frontend" });
        let (status, body) = post(&app.router, document.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "labels": { "app": "from-image", "team": "infra", "tier": "frontend" } })
        );
    }

    #[tokio::test]
    async fn test_merge_rejects_non_string_pod_labels() {
        let mut settings = Settings::default();
        settings.webhook.merge_pod_labels = true;
        let registry = Arc::new(FakeRegistryClient::with_labels(
            "registry.example.com",
            &[("team", "infra")],
        ));
        let app = test_app(settings, vec![registry]);

        let mut document = pod("registry.example.com/app:v1");
        document["metadata"]["labels"] = json!({ "replicas": 3 });
        let (status, body) = post(&app.router, document.to_string()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Pod labels are not a string map" }));
    }

    #[tokio::test]
    async fn test_slow_registry_hits_request_timeout() {
        let registry = Arc::new(FakeRegistryClient {
            delay: Duration::from_secs(5),
            ..FakeRegistryClient::with_labels("registry.example.com", &[("team", "infra")])
        });
        let TestApp { state, .. } = test_app(Settings::default(), vec![registry]);
        let router = crate::app(state, Duration::from_millis(50));

        let (status, _) = post_pod(&router, "registry.example.com/app:v1").await;

        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_pod_labels_ignored_unless_merging() {
        let registry = Arc::new(FakeRegistryClient::with_labels(
            "registry.example.com",
            &[("team", "infra")],
        ));
        let app = test_app(Settings::default(), vec![registry]);

        let (_, body) = post_pod(&app.router, "registry.example.com/app:v1").await;

        assert_eq!(body, json!({ "labels": { "team": "infra" } }));
    }

    #[tokio::test]
    async fn test_oversized_config_blob_is_rejected() {
        let mut settings = Settings::default();
        settings.registry.max_config_size_bytes = 16;
        let registry = Arc::new(FakeRegistryClient::with_labels(
            "registry.example.com",
            &[("description", "much-longer-than-sixteen-bytes")],
        ));
        let app = test_app(settings, vec![registry.clone()]);

        let (status, _) = post_pod(&app.router, "registry.example.com/app:v1").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            registry.blob_calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }
}
