use tenant_operator::config::KeycloakConfig;
use tenant_operator::identity::{IdentityActor, IdentityError, KeycloakActor, ensure_role};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, body_string_contains, header, method, path, query_param},
};

const ROLES: &str = "/admin/realms/crownlabs/clients/uuid-1/roles";

fn config(server: &MockServer) -> KeycloakConfig {
    KeycloakConfig {
        url: Some(server.uri()),
        realm: "crownlabs".into(),
        client_id: Some("operator".into()),
        client_secret: Some("s3cret".into()),
        roles_client_id: Some("k8s".into()),
        request_timeout_secs: 5,
    }
}

async fn mount_auth(server: &MockServer, token_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/realms/crownlabs/protocol/openid-connect/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=operator"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-1",
            "expires_in": 300,
            "token_type": "Bearer"
        })))
        .expect(token_calls)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/admin/realms/crownlabs/clients"))
        .and(query_param("clientId", "k8s"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([{"id": "uuid-1", "clientId": "k8s"}])),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn initialize_caches_token_and_client() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(format!("{ROLES}/workspace-ws1:user")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "role-9",
            "name": "workspace-ws1:user",
            "description": "WS1 User"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let actor = KeycloakActor::new(&config(&server)).unwrap();
    assert!(!actor.is_initialized());
    actor.initialize().await.unwrap();
    assert!(actor.is_initialized());

    // both lookups reuse the cached token and client id
    for _ in 0..2 {
        let role = actor.get_role("workspace-ws1:user").await.unwrap();
        assert_eq!(role.id, "role-9");
    }
}

#[tokio::test]
async fn ensure_role_creates_missing_role() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;

    let role = format!("{ROLES}/workspace-ws1:manager");
    Mock::given(method("GET"))
        .and(path(role.clone()))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ROLES))
        .and(body_partial_json(serde_json::json!({
            "name": "workspace-ws1:manager",
            "description": "WS1 Manager"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(role))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "role-1",
            "name": "workspace-ws1:manager"
        })))
        .mount(&server)
        .await;

    let actor = KeycloakActor::new(&config(&server)).unwrap();
    actor.initialize().await.unwrap();
    ensure_role(&actor, "workspace-ws1:manager", "WS1 Manager")
        .await
        .unwrap();
}

#[tokio::test]
async fn create_role_tolerates_conflict() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path(ROLES))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{ROLES}/workspace-ws1:user")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "role-2",
            "name": "workspace-ws1:user"
        })))
        .mount(&server)
        .await;

    let actor = KeycloakActor::new(&config(&server)).unwrap();
    let id = actor
        .create_role("workspace-ws1:user", "WS1 User")
        .await
        .unwrap();
    assert_eq!(id, "role-2");
}

#[tokio::test]
async fn delete_missing_role_is_ok_but_errors_surface() {
    let server = MockServer::start().await;
    mount_auth(&server, 1).await;
    Mock::given(method("DELETE"))
        .and(path(format!("{ROLES}/workspace-gone:user")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{ROLES}/workspace-ws1:user")))
        .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
        .mount(&server)
        .await;

    let actor = KeycloakActor::new(&config(&server)).unwrap();
    actor.delete_role("workspace-gone:user").await.unwrap();
    let err = actor.delete_role("workspace-ws1:user").await.unwrap_err();
    match err {
        IdentityError::Api { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "db down");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn bad_credentials_fail_initialization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/realms/crownlabs/protocol/openid-connect/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized_client"))
        .mount(&server)
        .await;

    let actor = KeycloakActor::new(&config(&server)).unwrap();
    let err = actor.initialize().await.unwrap_err();
    assert!(matches!(err, IdentityError::Api { status: 401, .. }));
    assert!(!actor.is_initialized());
}
