//! End-to-end tests through the HTTP transport.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cluster_balancer::admin::handlers::ClusterStatus;
use cluster_balancer::config::SessionIdConfig;
use cluster_balancer::load_balancer::DEFAULT_CLUSTER;

mod common;

async fn get_text(client: &reqwest::Client, url: String) -> (u16, String) {
    let res = client.get(url).send().await.expect("Proxy unreachable");
    let status = res.status().as_u16();
    (status, res.text().await.unwrap())
}

#[tokio::test]
async fn test_round_robin_alternates() {
    let a = common::start_backend("a").await;
    let b = common::start_backend("b").await;
    let proxy = common::start_proxy(common::config_with(&[a, b])).await;
    let client = common::client();

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let (status, body) = get_text(&client, proxy.url("/")).await;
        assert_eq!(status, 200);
        bodies.push(body);
    }
    assert_eq!(bodies, ["a /", "b /", "a /", "b /"]);

    let nodes = proxy.balancer.nodes_of(DEFAULT_CLUSTER).unwrap();
    assert!(nodes.iter().all(|n| n.dispatch_count() == 2 && n.in_flight() == 0));
}

#[tokio::test]
async fn test_path_and_query_forwarded() {
    let a = common::start_backend("a").await;
    let proxy = common::start_proxy(common::config_with(&[a])).await;

    let res = common::client()
        .get(proxy.url("/api/items?page=2"))
        .send()
        .await
        .unwrap();
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "a /api/items?page=2");
}

#[tokio::test]
async fn test_failover_past_dead_node() {
    let dead = common::dead_addr().await;
    let live = common::start_backend("live").await;
    let proxy = common::start_proxy(common::config_with(&[dead, live])).await;
    let client = common::client();

    for _ in 0..6 {
        let (status, body) = get_text(&client, proxy.url("/")).await;
        assert_eq!(status, 200);
        assert_eq!(body, "live /");
    }

    // Three failed primaries reach the default unhealthy threshold.
    let nodes = proxy.balancer.nodes_of(DEFAULT_CLUSTER).unwrap();
    assert!(nodes[0].is_down());
    assert_eq!(nodes[0].stats().failures, 3);
    assert!(!nodes[1].is_down());
}

#[tokio::test]
async fn test_unavailable_status_fails_over() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let flaky = common::start_programmable_backend(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (503, "Service Unavailable".to_string())
        }
    })
    .await;
    let ok = common::start_backend("ok").await;
    let proxy = common::start_proxy(common::config_with(&[flaky, ok])).await;

    let (status, body) = get_text(&common::client(), proxy.url("/")).await;
    assert_eq!(status, 200);
    assert_eq!(body, "ok /");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_last_destination_status_is_returned() {
    let unavailable = common::start_programmable_backend(|| async { (503, "busy".to_string()) }).await;
    let proxy = common::start_proxy(common::config_with(&[unavailable])).await;

    let (status, body) = get_text(&common::client(), proxy.url("/")).await;
    assert_eq!(status, 503);
    assert_eq!(body, "busy");
}

#[tokio::test]
async fn test_empty_cluster_returns_500() {
    let proxy = common::start_proxy(common::config_with(&[])).await;

    let (status, _) = get_text(&common::client(), proxy.url("/")).await;
    assert_eq!(status, 500);
}

#[tokio::test]
async fn test_all_nodes_dead_returns_502() {
    let dead = common::dead_addr().await;
    let proxy = common::start_proxy(common::config_with(&[dead])).await;

    let (status, _) = get_text(&common::client(), proxy.url("/")).await;
    assert_eq!(status, 502);
    let nodes = proxy.balancer.nodes_of(DEFAULT_CLUSTER).unwrap();
    assert_eq!(nodes[0].in_flight(), 0);
}

#[tokio::test]
async fn test_sticky_session_from_response_cookie() {
    let a = common::start_backend("a").await;
    let b = common::start_backend("b").await;
    let mut config = common::config_with(&[a, b]);
    config.balancer.session_id = Some(SessionIdConfig::Cookie {
        name: "JSESSIONID".into(),
    });
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let res = client.get(proxy.url("/login")).send().await.unwrap();
    let cookie = res
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("JSESSIONID=sess-a"));

    for _ in 0..4 {
        let res = client
            .get(proxy.url("/cart"))
            .header("cookie", "JSESSIONID=sess-a")
            .send()
            .await
            .unwrap();
        assert_eq!(res.text().await.unwrap(), "a /cart");
    }
}

#[tokio::test]
async fn test_sticky_session_from_request_header() {
    let a = common::start_backend("a").await;
    let b = common::start_backend("b").await;
    let c = common::start_backend("c").await;
    let mut config = common::config_with(&[a, b, c]);
    config.balancer.session_id = Some(SessionIdConfig::Header {
        name: "X-Session-Id".into(),
    });
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let mut bodies = Vec::new();
    for _ in 0..5 {
        let res = client
            .get(proxy.url("/"))
            .header("x-session-id", "user-7")
            .send()
            .await
            .unwrap();
        bodies.push(res.text().await.unwrap());
    }
    assert!(bodies.iter().all(|b| *b == bodies[0]));

    let cluster = proxy.balancer.cluster(DEFAULT_CLUSTER).unwrap();
    assert_eq!(cluster.sessions().len(), 1);
}

#[tokio::test]
async fn test_config_update_replaces_nodes() {
    let a = common::start_backend("a").await;
    let b = common::start_backend("b").await;
    let proxy = common::start_proxy(common::config_with(&[a])).await;
    let client = common::client();

    assert_eq!(get_text(&client, proxy.url("/")).await.1, "a /");

    proxy.updates.send(common::config_with(&[b])).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(get_text(&client, proxy.url("/")).await.1, "b /");
}

#[tokio::test]
async fn test_sticky_session_from_xml_body() {
    let a = common::start_backend("a").await;
    let b = common::start_backend("b").await;
    let c = common::start_backend("c").await;
    let mut config = common::config_with(&[a, b, c]);
    config.balancer.session_id = Some(SessionIdConfig::XmlElement {
        local_name: "session".into(),
        namespace: None,
    });
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    let mut bodies = Vec::new();
    for line in 0..4 {
        let res = client
            .post(proxy.url("/orders"))
            .header("content-type", "application/xml")
            .body(format!("<order><session>cust-9</session><line>{}</line></order>", line))
            .send()
            .await
            .unwrap();
        bodies.push(res.text().await.unwrap());
    }
    assert!(bodies.iter().all(|b| *b == bodies[0]));

    let cluster = proxy.balancer.cluster(DEFAULT_CLUSTER).unwrap();
    assert_eq!(cluster.sessions().len(), 1);
}

#[tokio::test]
async fn test_client_timeout_releases_in_flight() {
    let slow = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "late".to_string())
    })
    .await;
    let proxy = common::start_proxy(common::config_with(&[slow])).await;
    let impatient = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .no_proxy()
        .build()
        .unwrap();

    assert!(impatient.get(proxy.url("/")).send().await.is_err());

    // Checked well before the backend would have answered.
    let node = proxy.balancer.nodes_of(DEFAULT_CLUSTER).unwrap()[0].clone();
    for _ in 0..20 {
        if node.in_flight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(node.in_flight(), 0);
    assert_eq!(node.dispatch_count(), 1);
    assert_eq!(node.stats().requests, 0);
    assert!(!node.is_down());
}

#[tokio::test]
async fn test_config_update_enables_health_checks() {
    let dead = common::dead_addr().await;
    let live = common::start_backend("a").await;
    let proxy = common::start_proxy(common::config_with(&[dead, live])).await;
    let nodes = proxy.balancer.nodes_of(DEFAULT_CLUSTER).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!nodes[0].is_down());

    let mut config = common::config_with(&[dead, live]);
    config.health_check.enabled = true;
    config.health_check.interval_secs = 1;
    config.health_check.timeout_secs = 1;
    config.health_check.unhealthy_threshold = 1;
    config.health_check.healthy_threshold = 1;
    proxy.updates.send(config).unwrap();

    // No traffic is sent; only the restarted monitor can mark the node down.
    for _ in 0..40 {
        if nodes[0].is_down() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(nodes[0].is_down());
    assert!(!nodes[1].is_down());
}

#[tokio::test]
async fn test_admin_api_reports_clusters() {
    let a = common::start_backend("a").await;
    let b = common::start_backend("b").await;
    let mut config = common::config_with(&[a, b]);
    config.admin.enabled = true;
    config.admin.api_key = "test-key".into();
    config.admin.bind_address = "127.0.0.1:28481".into();
    let proxy = common::start_proxy(config).await;
    let client = common::client();

    get_text(&client, proxy.url("/")).await;

    let denied = client
        .get("http://127.0.0.1:28481/admin/clusters")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let clusters: Vec<ClusterStatus> = client
        .get("http://127.0.0.1:28481/admin/clusters")
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].name, DEFAULT_CLUSTER);
    assert_eq!(clusters[0].nodes.len(), 2);
    let dispatched: u64 = clusters[0].nodes.iter().map(|n| n.dispatch_count).sum();
    assert_eq!(dispatched, 1);

    let status: serde_json::Value = client
        .get("http://127.0.0.1:28481/admin/status")
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["strategy"], "round_robin");
    assert_eq!(status["cleanup_running"], true);
}
