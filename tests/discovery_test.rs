//! Integration tests for DiscoveryClient using wiremock
//!
//! These tests pin down the read-modify-write protocol against the
//! discovery host list: GET first, then POST (absent) or PUT (present).

mod common;

use maxstream::discovery::{
    DeregisterOutcome, Discovery, DiscoveryClient, DiscoveryError, HostList, RegisterOutcome,
};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESOURCE: &str = "/edsservice/eds-cluster-service";

fn client_for(server: &MockServer) -> DiscoveryClient {
    DiscoveryClient::new(format!("{}{RESOURCE}", server.uri()), Duration::from_secs(5)).unwrap()
}

/// Decode the single write request the mock received with `verb`
async fn written_list(server: &MockServer, verb: &str) -> HostList {
    let requests = server.received_requests().await.unwrap();
    let writes: Vec<_> = requests
        .iter()
        .filter(|r| r.method.as_str() == verb)
        .collect();
    assert_eq!(writes.len(), 1, "expected exactly one {verb}");
    serde_json::from_slice(&writes[0].body).unwrap()
}

/// 404 on GET: register creates the resource with only this host
#[tokio::test]
async fn test_register_creates_missing_resource() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let outcome = client
        .register_entry(&common::entry("10.0.0.5"))
        .await
        .unwrap();
    assert_eq!(outcome, RegisterOutcome::Created);

    let list = written_list(&mock_server, "POST").await;
    assert_eq!(list.len(), 1);
    assert_eq!(list.hosts[0], common::entry("10.0.0.5"));
}

/// Existing two-entry list: register PUTs three entries, self last
#[tokio::test]
async fn test_register_appends_to_existing_list() {
    let mock_server = MockServer::start().await;
    let existing = HostList::new(vec![common::entry("10.0.0.1"), common::entry("10.0.0.2")]);

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200).set_body_json(&existing))
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let outcome = client
        .register_entry(&common::entry("10.0.0.5"))
        .await
        .unwrap();
    assert_eq!(outcome, RegisterOutcome::Appended { hosts: 3 });

    let list = written_list(&mock_server, "PUT").await;
    assert_eq!(list.len(), 3);
    assert_eq!(&list.hosts[..2], &existing.hosts[..]);
    assert_eq!(list.hosts[2].ip_address, "10.0.0.5");
}

/// Deregister removes every entry for the address and keeps the rest in order
#[tokio::test]
async fn test_deregister_removes_all_entries_for_address() {
    let mock_server = MockServer::start().await;
    let existing = HostList::new(vec![
        common::entry("10.0.0.5"),
        common::entry("10.0.0.1"),
        common::entry("10.0.0.5"),
        common::entry("10.0.0.2"),
    ]);

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200).set_body_json(&existing))
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let outcome = client.deregister_address("10.0.0.5").await.unwrap();
    assert_eq!(
        outcome,
        DeregisterOutcome::Removed {
            removed: 2,
            remaining: 2
        }
    );

    let list = written_list(&mock_server, "PUT").await;
    let ips: Vec<_> = list.hosts.iter().map(|h| h.ip_address.as_str()).collect();
    assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);
}

/// Deregister with nothing to remove writes nothing back
#[tokio::test]
async fn test_deregister_without_entry_skips_write() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(HostList::new(vec![common::entry("10.0.0.1")])),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    assert_eq!(
        client.deregister_address("10.0.0.5").await.unwrap(),
        DeregisterOutcome::NotListed
    );
}

/// Deregister against a missing resource succeeds without writing
#[tokio::test]
async fn test_deregister_missing_resource() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    assert_eq!(
        client.deregister_address("10.0.0.5").await.unwrap(),
        DeregisterOutcome::Missing
    );
    assert!(client.deregister("10.0.0.5").await.is_ok());
}

/// Unexpected GET status is an error and nothing is written
#[tokio::test]
async fn test_unexpected_get_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client
        .register_entry(&common::entry("10.0.0.5"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::UnexpectedStatus {
            method: "GET",
            status: 503
        }
    ));
    assert!(err.is_recoverable());
}

/// Rejected PUT surfaces as an error
#[tokio::test]
async fn test_rejected_put() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200).set_body_json(HostList::default()))
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(400))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client
        .register_entry(&common::entry("10.0.0.5"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DiscoveryError::UnexpectedStatus {
            method: "PUT",
            status: 400
        }
    ));
    assert!(!err.is_recoverable());
}

/// Malformed body on GET is a decode error
#[tokio::test]
async fn test_malformed_host_list() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client.fetch().await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Decode(_)));
}

/// Slow mutation is cut off by the client timeout
#[tokio::test]
async fn test_mutation_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let client = DiscoveryClient::new(
        format!("{}{RESOURCE}", mock_server.uri()),
        Duration::from_millis(200),
    )
    .unwrap();

    let err = client
        .register_entry(&common::entry("10.0.0.5"))
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Network(_)));
}

/// Register then deregister against a live in-memory resource restores it
#[tokio::test]
async fn test_register_deregister_round_trip() {
    let original = HostList::new(vec![common::entry("10.0.0.1"), common::entry("10.0.0.2")]);
    let fake = common::FakeDiscovery::start(Some(original.clone())).await;
    let client = DiscoveryClient::new(fake.url(), Duration::from_secs(5)).unwrap();

    client.register(&common::entry("10.0.0.5")).await.unwrap();
    let during = fake.hosts().await.unwrap();
    assert_eq!(during.len(), 3);
    assert!(during.contains_address("10.0.0.5"));

    client.deregister("10.0.0.5").await.unwrap();
    assert_eq!(fake.hosts().await, Some(original));
}

/// Entries written by other tools decode and are written back untouched
#[tokio::test]
async fn test_register_keeps_foreign_entries() {
    let mock_server = MockServer::start().await;
    let foreign = serde_json::json!({"hosts": [
        {"ip_address": "10.0.0.7", "port": 70000, "tags": {"az": "b", "canary": true, "load_balancing_weight": -3}},
        {"ip_address": "10.0.0.8", "port": 50005}
    ]});

    Mock::given(method("GET"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200).set_body_json(&foreign))
        .mount(&mock_server)
        .await;

    Mock::given(method("PUT"))
        .and(path(RESOURCE))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let outcome = client
        .register_entry(&common::entry("10.0.0.5"))
        .await
        .unwrap();
    assert_eq!(outcome, RegisterOutcome::Appended { hosts: 3 });

    let list = written_list(&mock_server, "PUT").await;
    assert_eq!(list.hosts[0].port, 70000);
    assert_eq!(list.hosts[0].tags.load_balancing_weight, -3);
    assert_eq!(list.hosts[1].tags, maxstream::discovery::HostTags::default());
    assert_eq!(list.hosts[2].ip_address, "10.0.0.5");
}
