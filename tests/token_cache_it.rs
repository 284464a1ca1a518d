use fnguard::authorization::{ApplicationAuthorization, ApplicationAuthorizationSpec};
use fnguard::FrameworkError;
use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn epoch_in(seconds: i64) -> i64 {
    chrono::Utc::now().timestamp() + seconds
}

const VAULT: &str = "https://vault.azure.net";

#[tokio::test]
#[serial]
async fn managed_identity_token_is_fetched_once_within_its_validity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity"))
        .and(query_param("resource", VAULT))
        .and(query_param("api-version", "2019-08-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "T1",
            "expires_on": epoch_in(3600),
        })))
        .expect(1)
        .mount(&server)
        .await;

    std::env::set_var("IDENTITY_ENDPOINT", format!("{}/identity", server.uri()));
    std::env::set_var("IDENTITY_SECRET", "local-secret");

    let authorization =
        ApplicationAuthorization::from_spec(ApplicationAuthorizationSpec::managed([VAULT]))
            .unwrap();
    authorization.initialize().await.unwrap();

    // both reads come out of the cache; the mock verifies a single call
    assert_eq!(authorization.get_token(VAULT).await.unwrap(), "T1");
    assert_eq!(authorization.get_token(VAULT).await.unwrap(), "T1");

    std::env::remove_var("IDENTITY_ENDPOINT");
    std::env::remove_var("IDENTITY_SECRET");
}

#[tokio::test]
#[serial]
async fn client_credentials_grant_is_cached_within_its_validity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=app-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "C1",
            "expiresOn": epoch_in(3600).to_string(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let spec = ApplicationAuthorizationSpec::client_credentials(
        server.uri(),
        "contoso",
        "app-1",
        "s3cret",
        ["api://downstream"],
    );
    let authorization = ApplicationAuthorization::from_spec(spec).unwrap();

    assert_eq!(
        authorization.get_token("api://downstream").await.unwrap(),
        "C1"
    );
    assert_eq!(
        authorization.get_token("api://downstream").await.unwrap(),
        "C1"
    );
}

#[tokio::test]
#[serial]
async fn expired_tokens_are_refreshed_transparently() {
    let server = MockServer::start().await;
    // expiry in the past: every get_token call must go back to the endpoint
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "C1",
            "expiresOn": epoch_in(-10),
        })))
        .mount(&server)
        .await;

    let spec = ApplicationAuthorizationSpec::client_credentials(
        server.uri(),
        "contoso",
        "app-1",
        "s3cret",
        ["api://downstream"],
    );
    let authorization = ApplicationAuthorization::from_spec(spec).unwrap();

    authorization.get_token("api://downstream").await.unwrap();
    authorization.get_token("api://downstream").await.unwrap();

    let calls = server.received_requests().await.unwrap();
    assert_eq!(calls.len(), 2);
}

#[tokio::test]
#[serial]
async fn rejected_grants_fail_the_initialization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let spec = ApplicationAuthorizationSpec::client_credentials(
        server.uri(),
        "contoso",
        "app-1",
        "wrong",
        ["api://downstream"],
    );
    let authorization = ApplicationAuthorization::from_spec(spec).unwrap();
    let error = authorization.initialize().await.unwrap_err();
    assert!(matches!(error, FrameworkError::Unauthorized { .. }));
}

#[tokio::test]
#[serial]
async fn initialization_warms_every_declared_resource() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identity"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "T1",
            "expires_on": epoch_in(3600),
        })))
        .expect(2)
        .mount(&server)
        .await;

    std::env::set_var("IDENTITY_ENDPOINT", format!("{}/identity", server.uri()));
    std::env::set_var("IDENTITY_SECRET", "local-secret");

    let spec = ApplicationAuthorizationSpec::managed([VAULT, "https://storage.azure.com"]);
    let authorization = ApplicationAuthorization::from_spec(spec).unwrap();
    authorization.initialize().await.unwrap();

    // warmed by initialize; no further endpoint traffic
    authorization.get_token(VAULT).await.unwrap();
    authorization
        .get_token("https://storage.azure.com")
        .await
        .unwrap();

    std::env::remove_var("IDENTITY_ENDPOINT");
    std::env::remove_var("IDENTITY_SECRET");
}
