// Resource operations through the registry against a mock platform API.

use cloudlink::config::CloudlinkConfig;
use cloudlink::resources::{CreateDatabase, DatabaseStatus, DeploymentState, EnvVar};
use cloudlink::{CloudError, ProviderRegistry};
use mockito::{Matcher, Server};
use serde_json::json;

fn registry_for(server: &Server) -> ProviderRegistry {
    let mut config = CloudlinkConfig::default();
    config.platform.base_url = server.url();
    config.resources.default_region = "fra1".to_string();
    config.resources.default_plan = "pro".to_string();
    ProviderRegistry::with_defaults(&config).unwrap()
}

#[tokio::test]
async fn test_provision_database_and_wire_env() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("POST", "/v1/storage/stores")
        .match_header("authorization", "Bearer user-token")
        .match_body(Matcher::PartialJson(json!({"region": "fra1", "plan": "pro"})))
        .with_status(200)
        .with_body(r#"{"store":{"id":"store_9","name":"orders","status":"ready"}}"#)
        .create_async()
        .await;
    let env = server
        .mock("POST", "/v10/projects/prj_1/env")
        .match_query(Matcher::UrlEncoded("upsert".into(), "true".into()))
        .with_status(201)
        .with_body(r#"{"created":{"id":"env_1","key":"DATABASE_ID","target":["production"]}}"#)
        .create_async()
        .await;

    let registry = registry_for(&server);
    let vercel = registry.get("VERCEL").unwrap();

    let database = vercel
        .create_database("user-token", &CreateDatabase::named("orders"))
        .await
        .unwrap();
    assert_eq!(database.status, DatabaseStatus::Ready);

    let stored = vercel
        .update_env_vars(
            "user-token",
            "prj_1",
            &[EnvVar::new("DATABASE_ID", database.id.clone()).with_targets(&["production"])],
        )
        .await
        .unwrap();
    assert_eq!(stored[0].key, "DATABASE_ID");

    create.assert_async().await;
    env.assert_async().await;
}

#[tokio::test]
async fn test_validation_failures_make_no_calls() {
    let mut server = Server::new_async().await;
    let any_post = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let any_get = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let registry = registry_for(&server);
    let vercel = registry.get("vercel").unwrap();

    let err = vercel
        .create_database("user-token", &CreateDatabase::named("Bad Name"))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Validation { .. }));

    let err = vercel
        .update_env_vars("user-token", "prj_1", &[EnvVar::new("not-valid", "x")])
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Validation { .. }));

    let err = vercel.get_deployment("user-token", "").await.unwrap_err();
    assert!(matches!(err, CloudError::Validation { .. }));

    any_post.assert_async().await;
    any_get.assert_async().await;
}

#[tokio::test]
async fn test_status_classes_are_distinguishable() {
    let mut server = Server::new_async().await;
    let _unauthorized = server
        .mock("GET", "/v9/projects")
        .with_status(401)
        .with_body(r#"{"error":{"code":"unauthorized","message":"Invalid token"}}"#)
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/v13/deployments/dpl_gone")
        .with_status(404)
        .with_body(r#"{"error":{"code":"not_found","message":"Deployment not found"}}"#)
        .create_async()
        .await;
    let _limited = server
        .mock("GET", "/v6/deployments")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_header("x-rate-limit-remaining", "0")
        .with_header("x-rate-limit-reset", "4102444800")
        .with_body(r#"{"error":{"code":"rate_limited","message":"Slow down"}}"#)
        .create_async()
        .await;

    let registry = registry_for(&server);
    let vercel = registry.get("vercel").unwrap();

    let err = vercel.list_projects("tok").await.unwrap_err();
    assert!(err.is_auth_failure());
    assert_eq!(err.status(), Some(401));

    let err = vercel.get_deployment("tok", "dpl_gone").await.unwrap_err();
    assert!(err.is_not_found());

    let err = vercel.list_deployments("tok", None).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert!(matches!(err, CloudError::RateLimited { reset_at: Some(_), .. }));
}

#[tokio::test]
async fn test_deployment_round_trip() {
    let mut server = Server::new_async().await;
    let _create = server
        .mock("POST", "/v13/deployments")
        .with_status(200)
        .with_body(r#"{"id":"dpl_1","name":"site","readyState":"QUEUED","url":"site-1.vercel.app"}"#)
        .create_async()
        .await;
    let _get = server
        .mock("GET", "/v13/deployments/dpl_1")
        .with_status(200)
        .with_body(r#"{"id":"dpl_1","name":"site","readyState":"READY","url":"site-1.vercel.app"}"#)
        .create_async()
        .await;

    let registry = registry_for(&server);
    let vercel = registry.get("vercel").unwrap();

    let created = vercel
        .create_deployment(
            "tok",
            &cloudlink::resources::CreateDeployment {
                name: "site".to_string(),
                project: "prj_1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(created.state, DeploymentState::Queued);

    let fetched = vercel.get_deployment("tok", &created.id).await.unwrap();
    assert_eq!(fetched.state, DeploymentState::Ready);
    assert_eq!(fetched.url.as_deref(), Some("site-1.vercel.app"));
}
