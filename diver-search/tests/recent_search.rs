//! Recent-search client against a loopback stub.

use diver_search::{RecentSearchClient, SearchProvider};
use diver_test_utils::{StubResponse, StubServer};
use secrecy::SecretString;
use serde_json::json;

fn client(server: &StubServer) -> RecentSearchClient {
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    RecentSearchClient::with_client(http, &server.url(), SecretString::new("search-token".into()), 10)
}

fn lookup(id: &str, text: &str, media_url: Option<&str>) -> StubResponse {
    let mut body = json!({ "data": { "id": id, "text": text } });
    if let Some(url) = media_url {
        body["includes"] = json!({ "media": [{ "media_key": "3_1", "type": "photo", "url": url }] });
    }
    StubResponse::json(200, body)
}

#[tokio::test]
async fn test_hits_without_image_are_skipped_in_order() {
    let server = StubServer::start(vec![
        StubResponse::json(
            200,
            json!({
                "data": [{ "id": "30", "text": "c" }, { "id": "20", "text": "b" }, { "id": "10", "text": "a" }],
                "meta": { "result_count": 3 }
            }),
        ),
        lookup("30", "third", Some("https://pbs.test/30.png")),
        lookup("20", "no picture", None),
        lookup("10", "first", Some("https://pbs.test/10.png")),
    ])
    .await
    .unwrap();

    let candidates = client(&server).search("#legodiver").await.unwrap();

    let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["30", "10"]);
    assert_eq!(candidates[0].text, "third");
    assert_eq!(candidates[0].image_url, "https://pbs.test/30.png");

    let requests = server.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].path(), "/2/tweets/search/recent");
    assert!(requests[0].query().contains("max_results=10"));
    assert_eq!(requests[0].header("authorization"), Some("Bearer search-token"));
    assert_eq!(requests[2].path(), "/2/tweets/20");
    assert!(requests[2].query().contains("expansions=attachments.media_keys"));
    assert!(requests[2].query().contains("media.fields=url"));
}

#[tokio::test]
async fn test_zero_result_count_is_empty() {
    let server = StubServer::start(vec![StubResponse::json(
        200,
        json!({ "meta": { "result_count": 0 } }),
    )])
    .await
    .unwrap();

    let candidates = client(&server).search("#legodiver").await.unwrap();

    assert!(candidates.is_empty());
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_error_status_is_transport_failure() {
    let server = StubServer::start(vec![StubResponse::text(429, "Too Many Requests")])
        .await
        .unwrap();

    let err = client(&server).search("#legodiver").await.unwrap_err();

    assert_eq!(err.kind(), "transport_failure");
    let message = err.to_string();
    assert!(message.contains("429"), "{message}");
    assert!(message.contains("Too Many Requests"), "{message}");
}
