//! # Coordinator Integration Tests
//!
//! End-to-end flows through the public API: a `NamespaceClient` connected
//! to an in-memory namespace, the administration services on top of it,
//! and the shutdown coordinator driving several listeners at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;

use sb_core::domain::{
    EntityKind, EntityPath, MessageEnvelope, OutboundMessage, Properties, QueueRef,
    SubscriptionRef, TopicRef, DEFAULT_RULE_NAME,
};
use sb_core::{
    BrokerNamespace, ConnectionString, CoordinatorConfig, CoordinatorError, InMemoryConnector,
    InMemoryNamespace, MessageObserver, NamespaceClient, WorkerSpec, WorkerState,
};

const RAW: &str = "Endpoint=sb://flow.example/;SharedAccessKeyName=root;SharedAccessKey=secret";

struct Fixture {
    memory: InMemoryNamespace,
    client: NamespaceClient,
}

fn fixture(drain_timeout_secs: u64) -> Fixture {
    let memory = InMemoryNamespace::new("flow");
    let connector = Arc::new(InMemoryConnector::new());
    connector.insert(&ConnectionString::parse(RAW).unwrap(), memory.clone());
    let config = CoordinatorConfig {
        drain_timeout_secs,
        operation_timeout_secs: 5,
        ..CoordinatorConfig::default().with_connection_string(RAW)
    };
    Fixture {
        memory,
        client: NamespaceClient::new(config, connector),
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<MessageEnvelope>>,
}

impl Recorder {
    fn bodies_by_source(&self) -> HashMap<String, Vec<String>> {
        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for envelope in self.seen.lock().iter() {
            let source = match &envelope.subscription_name {
                Some(sub) => format!("{}/{sub}", envelope.entity_name),
                None => envelope.entity_name.clone(),
            };
            out.entry(source).or_default().push(envelope.body_text());
        }
        out
    }

    async fn wait_for(&self, count: usize) {
        timeout(Duration::from_secs(3), async {
            while self.seen.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("observer saw every message");
    }
}

impl MessageObserver for Recorder {
    fn on_message(&self, envelope: &MessageEnvelope) {
        self.seen.lock().push(envelope.clone());
    }
}

async fn send_text(memory: &InMemoryNamespace, path: EntityPath, body: &str) {
    memory
        .send(&path, OutboundMessage::new(body.as_bytes().to_vec()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_tap_runs_leave_broker_state_unchanged() {
    let f = fixture(5);
    f.client
        .entities()
        .await
        .unwrap()
        .create_topic(&TopicRef::new("events"))
        .await
        .unwrap();
    let before = f.memory.snapshot();
    let coordinator = f.client.coordinator().await.unwrap();

    for round in 0..2 {
        let recorder = Arc::new(Recorder::default());
        let mut handles = coordinator.spawn(vec![WorkerSpec::tap("events")], recorder.clone());
        handles[0].wait_for(WorkerState::Listening).await;

        let subs = f.memory.list_subscriptions("events").await.unwrap();
        assert_eq!(subs.len(), 1, "round {round}");
        assert_eq!(subs[0].name, "tap");

        send_text(&f.memory, EntityPath::topic("events"), "ping").await;
        recorder.wait_for(1).await;

        let summary = coordinator.cancel_all(handles).await;
        assert!(summary.is_clean());
        assert_eq!(summary.taps_deleted(), 1);
        assert_eq!(f.memory.snapshot(), before, "round {round}");
    }
}

#[tokio::test]
async fn test_existing_tap_is_not_deleted() {
    let f = fixture(5);
    f.client
        .entities()
        .await
        .unwrap()
        .create_topic(&TopicRef::new("events"))
        .await
        .unwrap();
    f.client
        .subscriptions()
        .await
        .unwrap()
        .create(&SubscriptionRef::new("events", "tap"))
        .await
        .unwrap();

    let coordinator = f.client.coordinator().await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut handles = coordinator.spawn(vec![WorkerSpec::tap("events")], recorder);
    handles[0].wait_for(WorkerState::Listening).await;

    let summary = coordinator.cancel_all(handles).await;
    assert_eq!(summary.taps_deleted(), 0);
    assert!(f
        .memory
        .get_subscription("events", "tap")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_rule_fragments_accumulate_and_replace_default() {
    let f = fixture(5);
    f.client
        .entities()
        .await
        .unwrap()
        .create_topic(&TopicRef::new("orders"))
        .await
        .unwrap();
    let subscriptions = f.client.subscriptions().await.unwrap();

    let subscription = SubscriptionRef::new("orders", "eu")
        .with_rule("region:Region = 'eu'")
        .with_rule("region:AND Size > 10");
    subscriptions.create(&subscription).await.unwrap();

    let rules = subscriptions.rules("orders", "eu").await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name, "region");
    assert_eq!(rules[0].filter, "Region = 'eu' AND Size > 10");
    assert!(rules.iter().all(|r| r.name != DEFAULT_RULE_NAME));

    let mut matching = OutboundMessage::new(b"big".to_vec());
    matching.properties = Properties::from([
        ("Region".to_string(), "eu".into()),
        ("Size".to_string(), 20_i64.into()),
    ]);
    let mut small = OutboundMessage::new(b"small".to_vec());
    small.properties = Properties::from([
        ("Region".to_string(), "eu".into()),
        ("Size".to_string(), 1_i64.into()),
    ]);
    f.memory.send(&EntityPath::topic("orders"), matching).await.unwrap();
    f.memory.send(&EntityPath::topic("orders"), small).await.unwrap();

    let listing = subscriptions.list("orders").await.unwrap();
    assert_eq!(listing[0].active_count, 1);
}

#[tokio::test]
async fn test_subscription_without_rules_keeps_default() {
    let f = fixture(5);
    f.client
        .entities()
        .await
        .unwrap()
        .create_topic(&TopicRef::new("orders"))
        .await
        .unwrap();
    let subscriptions = f.client.subscriptions().await.unwrap();
    subscriptions
        .create(&SubscriptionRef::new("orders", "all"))
        .await
        .unwrap();

    let rules = subscriptions.rules("orders", "all").await.unwrap();
    assert_eq!(rules.len(), 1);
    assert!(rules[0].is_default());
}

#[tokio::test]
async fn test_forward_targets_are_validated_before_create() {
    let f = fixture(5);
    let entities = f.client.entities().await.unwrap();
    entities.create_topic(&TopicRef::new("audit")).await.unwrap();

    let err = entities
        .create_queue(&QueueRef::new("inbox").forward_to("queue:missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::ForwardTargetNotFound { .. }));
    assert!(!entities.queue_exists("inbox").await.unwrap());

    entities
        .create_queue(&QueueRef::new("inbox").forward_to("topic:audit"))
        .await
        .unwrap();
    let inbox = entities.queue("inbox").await.unwrap();
    let target = inbox.forward_to.unwrap();
    assert_eq!((target.kind, target.name.as_str()), (EntityKind::Topic, "audit"));

    // Unknown kind: created without forwarding.
    entities
        .create_queue(&QueueRef::new("plain").forward_to("exchange:audit"))
        .await
        .unwrap();
    assert!(entities.queue("plain").await.unwrap().forward_to.is_none());
}

#[tokio::test]
async fn test_create_never_overwrites() {
    let f = fixture(5);
    let entities = f.client.entities().await.unwrap();
    entities.create_topic(&TopicRef::new("events")).await.unwrap();
    send_text(&f.memory, EntityPath::topic("events"), "kept").await;

    let err = entities.create_topic(&TopicRef::new("events")).await.unwrap_err();
    assert!(err.is_already_exists());

    let subscriptions = f.client.subscriptions().await.unwrap();
    subscriptions
        .create(&SubscriptionRef::new("events", "s1"))
        .await
        .unwrap();
    let err = subscriptions
        .create(&SubscriptionRef::new("events", "s1").with_rule("r:1=1"))
        .await
        .unwrap_err();
    assert!(err.is_already_exists());
    assert!(subscriptions.rules("events", "s1").await.unwrap()[0].is_default());
}

#[tokio::test]
async fn test_failed_rule_leaves_no_catch_all_subscription() {
    let f = fixture(5);
    f.client
        .entities()
        .await
        .unwrap()
        .create_topic(&TopicRef::new("events"))
        .await
        .unwrap();
    let subscriptions = f.client.subscriptions().await.unwrap();

    let err = subscriptions
        .create(&SubscriptionRef::new("events", "eu").with_rule("r:Region = 'eu"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Broker(_)));
    assert!(!subscriptions.exists("events", "eu").await.unwrap());

    subscriptions
        .create(&SubscriptionRef::new("events", "eu").with_rule("r:Region = 'eu'"))
        .await
        .unwrap();
    let rules = subscriptions.rules("events", "eu").await.unwrap();
    assert!(rules.iter().all(|r| r.name != DEFAULT_RULE_NAME));
}

#[tokio::test]
async fn test_peek_listener_leaves_messages_for_normal_listener() {
    let f = fixture(5);
    f.client
        .entities()
        .await
        .unwrap()
        .create_queue(&QueueRef::new("jobs"))
        .await
        .unwrap();
    for body in ["a", "b", "c"] {
        send_text(&f.memory, EntityPath::queue("jobs"), body).await;
    }
    let coordinator = f.client.coordinator().await.unwrap();

    let peeked = Arc::new(Recorder::default());
    let handles = coordinator.spawn(vec![WorkerSpec::queue("jobs").peek(true)], peeked.clone());
    peeked.wait_for(3).await;
    let summary = coordinator.cancel_all(handles).await;
    assert_eq!(summary.reports[0].completed, 0);
    assert_eq!(f.memory.list_queues().await.unwrap()[0].active_count, 3);

    let consumed = Arc::new(Recorder::default());
    let handles = coordinator.spawn(vec![WorkerSpec::queue("jobs")], consumed.clone());
    consumed.wait_for(3).await;
    let summary = coordinator.cancel_all(handles).await;
    assert_eq!(summary.reports[0].completed, 3);
    assert_eq!(f.memory.list_queues().await.unwrap()[0].active_count, 0);
    assert_eq!(
        consumed.bodies_by_source()["jobs"],
        vec!["a".to_string(), "b".into(), "c".into()]
    );
}

#[tokio::test]
async fn test_interrupt_drains_every_worker_without_duplicates() {
    let f = fixture(5);
    let entities = f.client.entities().await.unwrap();
    entities.create_topic(&TopicRef::new("events")).await.unwrap();
    entities.create_queue(&QueueRef::new("q1")).await.unwrap();
    entities.create_queue(&QueueRef::new("q2")).await.unwrap();
    let coordinator = f.client.coordinator().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let specs = vec![
        WorkerSpec::queue("q1"),
        WorkerSpec::queue("q2"),
        WorkerSpec::tap("events"),
    ];
    let (interrupt_tx, interrupt_rx) = oneshot::channel::<()>();
    let observer: Arc<dyn MessageObserver> = recorder.clone();
    let run = tokio::spawn(async move {
        coordinator
            .run_until(specs, observer, async {
                let _ = interrupt_rx.await;
            })
            .await
    });

    timeout(Duration::from_secs(2), async {
        while f.memory.get_subscription("events", "tap").await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    for i in 0..5 {
        send_text(&f.memory, EntityPath::queue("q1"), &format!("q1-{i}")).await;
        send_text(&f.memory, EntityPath::queue("q2"), &format!("q2-{i}")).await;
        send_text(&f.memory, EntityPath::topic("events"), &format!("ev-{i}")).await;
    }
    recorder.wait_for(15).await;

    interrupt_tx.send(()).unwrap();
    let summary = timeout(Duration::from_secs(5), run).await.unwrap().unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.reports.len(), 3);
    assert_eq!(summary.taps_deleted(), 1);
    for report in &summary.reports {
        assert_eq!(report.received, 5, "{}", report.spec);
    }

    let by_source = recorder.bodies_by_source();
    for (source, prefix) in [("q1", "q1"), ("q2", "q2"), ("events/tap", "ev")] {
        let expected: Vec<String> = (0..5).map(|i| format!("{prefix}-{i}")).collect();
        assert_eq!(by_source[source], expected);
    }
    assert!(f.memory.list_subscriptions("events").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_teardown_is_cut_off_at_drain_deadline() {
    let f = fixture(1);
    f.client
        .entities()
        .await
        .unwrap()
        .create_topic(&TopicRef::new("events"))
        .await
        .unwrap();
    let coordinator = f.client.coordinator().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let mut handles = coordinator.spawn(vec![WorkerSpec::tap("events")], recorder);
    handles[0].wait_for(WorkerState::Listening).await;

    f.memory.set_latency(Some(Duration::from_secs(30)));
    let summary = timeout(Duration::from_secs(5), coordinator.cancel_all(handles))
        .await
        .unwrap();
    f.memory.set_latency(None);

    assert!(summary.reports.is_empty());
    assert_eq!(summary.timed_out, vec![WorkerSpec::tap("events")]);
    assert!(!summary.is_clean());
}

#[tokio::test]
async fn test_unreachable_namespace_is_connection_error() {
    let f = fixture(5);
    f.memory.set_reachable(false);
    let entities = f.client.entities().await.unwrap();

    let err = entities.list_topics().await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Connection(_)));
}
