//! End-to-end relay flows against the in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tweetrelay_connectors::kafka::{BrokerAdmin, KafkaAdminClient, RegistryProbe, SchemaRegistryStatus};
use tweetrelay_connectors::source::StreamRule;
use tweetrelay_connectors::testing::{
    MockBrokerAdmin, MockRegistryProbe, MockRulesApi, RecordingPublisher, RulesCall,
};
use tweetrelay_connectors::{AppConfig, ConnectorError, Orchestrator, OrchestratorState};

fn synthetic_config() -> AppConfig {
    let text = r#"
        [source]
        keywords = ["Kafka"]
        enable_mock_tweets = true
        enable_v2_tweets = false
        mock_min_tweet_length = 3
        mock_max_tweet_length = 6
        mock_sleep_ms = 1000

        [kafka]
        topic_name = "twitter-topic"
        topic_names_to_create = ["twitter-topic", "audit-topic"]

        [retry]
        sleep_time_ms = 1000
    "#;
    let config = AppConfig::from_toml_str(text).unwrap();
    config.validate().unwrap();
    config
}

fn admin_client(
    config: &AppConfig,
    admin: &Arc<MockBrokerAdmin>,
    registry: &Arc<MockRegistryProbe>,
    cancel: &CancellationToken,
) -> KafkaAdminClient {
    KafkaAdminClient::new(
        Arc::clone(admin) as Arc<dyn BrokerAdmin>,
        Arc::clone(registry) as Arc<dyn RegistryProbe>,
        config.retry.clone(),
        cancel.clone(),
    )
}

#[tokio::test(start_paused = true)]
async fn synthetic_relay_publishes_after_readiness() {
    let config = synthetic_config();
    let admin = Arc::new(MockBrokerAdmin::new());
    // Topics show up on the second listing, the registry on the second probe.
    admin.script_listings(vec![vec![]]);
    let registry = Arc::new(MockRegistryProbe::scripted(vec![
        SchemaRegistryStatus::unhealthy("HTTP 503"),
        SchemaRegistryStatus::from_status_code(200),
    ]));
    let publisher = Arc::new(RecordingPublisher::new());
    let cancel = CancellationToken::new();

    let mut orch = Orchestrator::new(
        config.clone(),
        admin_client(&config, &admin, &registry, &cancel),
        Arc::clone(&publisher) as _,
        cancel.clone(),
    );

    orch.ensure_ready().await.unwrap();
    assert_eq!(orch.state(), OrchestratorState::AdminReady);
    assert_eq!(
        admin.topic_names(),
        vec!["audit-topic".to_string(), "twitter-topic".to_string()]
    );
    assert_eq!(registry.probe_calls(), 2);

    let tasks = orch.start_streaming().unwrap();
    assert_eq!(orch.state(), OrchestratorState::Streaming);
    assert!(!tasks.source.supports_shutdown());

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let sent = publisher.sent();
    assert_eq!(sent.len(), 3);
    for (topic, event) in &sent {
        assert_eq!(topic, "twitter-topic");
        assert!(event.text.contains("Kafka"));
        assert!(event.user_id > 0);
    }

    let metrics = orch.metrics().unwrap().snapshot();
    assert_eq!(metrics.published_total, 3);
    assert_eq!(metrics.dropped_total, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_request_leaves_synthetic_source_running() {
    let config = synthetic_config();
    let admin = Arc::new(MockBrokerAdmin::new());
    let registry = Arc::new(MockRegistryProbe::healthy());
    let publisher = Arc::new(RecordingPublisher::new());
    let cancel = CancellationToken::new();

    let mut orch = Orchestrator::new(
        config.clone(),
        admin_client(&config, &admin, &registry, &cancel),
        Arc::clone(&publisher) as _,
        cancel.clone(),
    );

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            cancel.cancel();
        })
    };

    let state = orch.run().await.unwrap();
    canceller.await.unwrap();
    assert_eq!(state, OrchestratorState::Streaming);

    let before = publisher.sent().len();
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert!(publisher.sent().len() > before);
}

#[tokio::test(start_paused = true)]
async fn invisible_topic_is_fatal() {
    let mut config = synthetic_config();
    config.retry.max_attempts = 2;
    let admin = Arc::new(MockBrokerAdmin::new());
    // Creation succeeds but the broker never lists anything.
    admin.script_listings(vec![vec![]; 10]);
    let registry = Arc::new(MockRegistryProbe::healthy());
    let cancel = CancellationToken::new();

    let mut orch = Orchestrator::new(
        config.clone(),
        admin_client(&config, &admin, &registry, &cancel),
        Arc::new(RecordingPublisher::new()),
        cancel,
    );

    let err = orch.run().await.unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(orch.state(), OrchestratorState::Fatal);
    // Never reached the registry.
    assert_eq!(registry.probe_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn rule_based_stream_reconciles_before_connecting() {
    let mut config = synthetic_config();
    config.source.enable_mock_tweets = false;
    config.source.enable_v2_tweets = true;
    config.source.bearer_token = Some("token".into());
    // Unroutable endpoint: the connect fails once the rules are in place.
    config.source.v2_base_url = "http://127.0.0.1:9/stream".into();

    let rules = Arc::new(MockRulesApi::with_rules(vec![StreamRule {
        id: Some("old".into()),
        value: "dogs".into(),
        tag: "Keyword: dogs".into(),
    }]));
    let admin = Arc::new(MockBrokerAdmin::new());
    let registry = Arc::new(MockRegistryProbe::healthy());
    let cancel = CancellationToken::new();

    let mut orch = Orchestrator::new(
        config.clone(),
        admin_client(&config, &admin, &registry, &cancel),
        Arc::new(RecordingPublisher::new()),
        cancel,
    )
    .with_rules_api(Arc::clone(&rules) as _);

    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, ConnectorError::ConnectionFailed(_)));
    assert_eq!(orch.state(), OrchestratorState::Fatal);

    assert_eq!(
        rules.calls(),
        vec![
            RulesCall::List,
            RulesCall::Delete(vec!["old".into()]),
            RulesCall::Add(vec![StreamRule::new("Kafka", "Keyword: Kafka")]),
        ]
    );
}

/// Serves one chunked streaming response carrying `lines`, then keeps the
/// connection open until the client goes away.
async fn serve_stream(lines: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before sending a request");
            request.extend_from_slice(&buf[..n]);
        }
        let request = String::from_utf8_lossy(&request).into_owned();
        assert!(request.starts_with("GET /filter?track=Kafka "), "{request}");

        let mut response = String::from(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Type: application/json\r\n\r\n",
        );
        for line in lines {
            response.push_str(&format!("{:x}\r\n{line}\r\n", line.len()));
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        // Hold the stream open; the relay must be the one to hang up.
        let _ = socket.read(&mut buf).await;
    });
    format!("http://{addr}/filter")
}

#[tokio::test]
async fn filtered_stream_shutdown_stops_the_relay() {
    let mut config = synthetic_config();
    config.source.enable_mock_tweets = false;
    config.source.enable_v2_tweets = false;
    config.source.filter_url = serve_stream(vec![
        r#"{"created_at":"Mon Apr 08 12:34:56 UTC 2024","id":"1","text":"hi \"there\"","user":{"id":5}}"#
            .to_string()
            + "\n",
    ])
    .await;

    let admin = Arc::new(MockBrokerAdmin::new());
    let registry = Arc::new(MockRegistryProbe::healthy());
    let publisher = Arc::new(RecordingPublisher::new());
    let cancel = CancellationToken::new();

    let mut orch = Orchestrator::new(
        config.clone(),
        admin_client(&config, &admin, &registry, &cancel),
        Arc::clone(&publisher) as _,
        cancel.clone(),
    );

    let relay = async {
        let (state, ()) = tokio::join!(orch.run(), async {
            for _ in 0..500 {
                if !publisher.sent().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            cancel.cancel();
        });
        state
    };
    let state = tokio::time::timeout(Duration::from_secs(10), relay)
        .await
        .expect("relay did not stop after shutdown");

    assert_eq!(state.unwrap(), OrchestratorState::Stopped);
    assert_eq!(orch.state(), OrchestratorState::Stopped);

    let sent = publisher.sent();
    assert_eq!(sent.len(), 1);
    let (topic, event) = &sent[0];
    assert_eq!(topic, "twitter-topic");
    assert_eq!(event.id, "1");
    assert_eq!(event.user_id, 5);
    assert_eq!(event.text, r#"hi "there""#);
    assert_eq!(orch.metrics().unwrap().snapshot().published_total, 1);
}
