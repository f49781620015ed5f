//! Integration tests for PlatformClient using wiremock

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use worldtally::client::{ChallengeResponse, LoginResponse, PlatformApi, PlatformClient};
use worldtally::config::Credentials;
use worldtally::utils::error::{AuthError, FetchError};

fn credentials() -> Credentials {
    Credentials::new("harvester@example.com", "p@ss word")
}

/// Credentials are URI-encoded before basic auth
#[tokio::test]
async fn test_login_success_with_encoded_basic_auth() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .and(header(
            "authorization",
            "Basic aGFydmVzdGVyJTQwZXhhbXBsZS5jb206cCU0MHNzJTIwd29yZA==",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "auth=authcookie_abc; Path=/; HttpOnly")
                .set_body_json(json!({ "id": "usr_me", "displayName": "me" })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();
    let response = client.login(&credentials()).await.unwrap();

    assert_eq!(
        response,
        LoginResponse::Authenticated {
            token: "authcookie_abc".to_string()
        }
    );
}

#[tokio::test]
async fn test_login_prefers_body_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "auth=from_cookie; Path=/")
                .set_body_json(json!({ "authToken": "from_body" })),
        )
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();
    let response = client.login(&credentials()).await.unwrap();

    assert_eq!(
        response,
        LoginResponse::Authenticated {
            token: "from_body".to_string()
        }
    );
}

#[tokio::test]
async fn test_login_requires_challenge() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "auth=pending_cookie; Path=/")
                .set_body_json(json!({ "requiresTwoFactorAuth": ["emailOtp"] })),
        )
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();
    let response = client.login(&credentials()).await.unwrap();

    assert_eq!(
        response,
        LoginResponse::ChallengeRequired {
            cookie: "pending_cookie".to_string()
        }
    );
}

#[tokio::test]
async fn test_login_failure_statuses() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();
    assert_eq!(
        client.login(&credentials()).await,
        Err(AuthError::InvalidCredentials)
    );
    assert_eq!(
        client.login(&credentials()).await,
        Err(AuthError::RateLimited)
    );
    assert_eq!(
        client.login(&credentials()).await,
        Err(AuthError::Unexpected(503))
    );
}

#[tokio::test]
async fn test_login_network_fault() {
    // Nothing listens on this port
    let client = PlatformClient::with_base_url("http://127.0.0.1:9").unwrap();
    let result = client.login(&credentials()).await;
    assert!(matches!(result, Err(AuthError::NetworkFault(_))));
}

#[tokio::test]
async fn test_verify_challenge() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/twofactorauth/emailotp/verify"))
        .and(header("cookie", "auth=pending_cookie"))
        .and(body_json(json!({ "code": "123456" })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "auth=verified_cookie; Path=/")
                .set_body_json(json!({ "verified": true })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/twofactorauth/emailotp/verify"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();

    let verified = client.verify_challenge("pending_cookie", "123456").await.unwrap();
    assert_eq!(
        verified,
        ChallengeResponse::Verified {
            token: Some("verified_cookie".to_string())
        }
    );

    let rejected = client.verify_challenge("pending_cookie", "000000").await.unwrap();
    assert_eq!(rejected, ChallengeResponse::Rejected);
}

#[tokio::test]
async fn test_verify_challenge_unverified_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/twofactorauth/emailotp/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "verified": false })))
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();
    let response = client.verify_challenge("cookie", "111111").await.unwrap();
    assert_eq!(response, ChallengeResponse::Rejected);
}

#[tokio::test]
async fn test_fetch_page_query_and_records() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/worlds"))
        .and(query_param("sort", "heat"))
        .and(query_param("n", "2"))
        .and(query_param("offset", "4"))
        .and(header("cookie", "auth=tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "wrld_1", "name": "Night Market", "authorId": "usr_1", "occupants": 12 },
            { "id": "wrld_2", "name": "Harbor", "authorId": "usr_2", "authorName": "sea" },
            { "unexpected": true }
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();
    let records = client.fetch_page("tok", "heat", 2, 4).await.unwrap();

    assert_eq!(records.len(), 2, "malformed record should be skipped");
    assert_eq!(records[0].id, "wrld_1");
    assert_eq!(records[0].load(), Some(12.0));
    assert_eq!(records[1].author_name.as_deref(), Some("sea"));
}

#[tokio::test]
async fn test_fetch_page_status_mapping() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/worlds"))
        .and(query_param("sort", "expired"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/worlds"))
        .and(query_param("sort", "busy"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/worlds"))
        .and(query_param("sort", "broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();
    assert_eq!(
        client.fetch_page("tok", "expired", 10, 0).await,
        Err(FetchError::Unauthorized)
    );
    assert_eq!(
        client.fetch_page("tok", "busy", 10, 0).await,
        Err(FetchError::RateLimited)
    );
    assert_eq!(
        client.fetch_page("tok", "broken", 10, 0).await,
        Err(FetchError::Status(500))
    );
}

#[tokio::test]
async fn test_fetch_companion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/usr_1"))
        .and(header("cookie", "auth=tok"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "usr_1", "displayName": "Maker" })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/usr_gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();

    let found = client.fetch_companion("tok", "usr_1").await.unwrap();
    assert_eq!(found["displayName"], "Maker");

    assert_eq!(
        client.fetch_companion("tok", "usr_gone").await,
        Err(FetchError::NotFound)
    );
}

/// Reserved characters in an id stay inside one path segment
#[tokio::test]
async fn test_fetch_companion_encodes_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/usr%20a%2Fb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "usr a/b" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = PlatformClient::with_base_url(&mock_server.uri()).unwrap();
    let found = client.fetch_companion("tok", "usr a/b").await.unwrap();
    assert_eq!(found["id"], "usr a/b");
}
