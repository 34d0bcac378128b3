use domain::Destination;
use std::sync::Arc;
use wavy_config::ForwardMode;
use wavy_ingest::DeviceCommandHandler;
use wavy_pipeline::{InlineForwardSink, Pipeline};
use wavy_protocol::{
    DeviceCommand, RecordingForwarder, Reply, ServerRequest, SessionHandler, SessionOutcome,
};
use wavy_storage::{DeviceRecord, RoutingRule, StateRegistry, StaticTableSource};

struct Fixture {
    handler: DeviceCommandHandler,
    forwarder: Arc<RecordingForwarder>,
    sink_forwarder: Arc<RecordingForwarder>,
    pipeline: Pipeline,
}

fn server() -> Destination {
    Destination::new("127.0.0.1", 5001)
}

fn rule_dest() -> Destination {
    Destination::new("127.0.0.1", 6001)
}

async fn fixture(mode: ForwardMode, reply: &str) -> Fixture {
    let source = StaticTableSource::new(
        vec![
            DeviceRecord::new("W1", "operating"),
            DeviceRecord::new("W2", "manutencao"),
        ],
        vec![
            RoutingRule::new("W1", "TEMP", true, rule_dest()),
            RoutingRule::new("W1", "WIND", false, rule_dest()),
        ],
    );
    let registry = Arc::new(StateRegistry::in_memory(Arc::new(source)));
    registry.reload().await.unwrap();

    let sink_forwarder = Arc::new(RecordingForwarder::replying("100 OK"));
    let pipeline = Pipeline::new(Arc::new(InlineForwardSink::new(sink_forwarder.clone())));
    let forwarder = Arc::new(RecordingForwarder::replying(reply));
    let handler = DeviceCommandHandler::new(
        registry,
        pipeline.clone(),
        forwarder.clone(),
        server(),
        mode,
    );
    Fixture {
        handler,
        forwarder,
        sink_forwarder,
        pipeline,
    }
}

async fn send(handler: &DeviceCommandHandler, line: &str) -> SessionOutcome {
    let command = DeviceCommand::parse(line).unwrap();
    handler.handle(line, command).await
}

#[tokio::test]
async fn register_relays_server_reply() {
    let fx = fixture(ForwardMode::Batch, "ACK REGISTERED").await;
    let outcome = send(&fx.handler, "REGISTER W1").await;
    assert_eq!(
        outcome,
        SessionOutcome::reply(Reply::Relayed("ACK REGISTERED".to_string()))
    );
    assert_eq!(
        fx.forwarder.sent(),
        vec![(ServerRequest::Forward("REGISTER W1".to_string()), server())]
    );
}

#[tokio::test]
async fn register_unknown_or_blocked_never_forwards() {
    let fx = fixture(ForwardMode::Batch, "ACK REGISTERED").await;
    for id in ["W9", "w1", "ghost"] {
        let outcome = send(&fx.handler, &format!("REGISTER {id}")).await;
        assert_eq!(outcome, SessionOutcome::reply(Reply::NotAssociated));
    }
    let outcome = send(&fx.handler, "REGISTER W2").await;
    assert_eq!(
        outcome,
        SessionOutcome::reply(Reply::BlockedState("manutencao".to_string()))
    );
    assert!(fx.forwarder.sent().is_empty());
}

#[tokio::test]
async fn register_forward_failure_is_server_unavailable() {
    let fx = fixture(ForwardMode::Batch, "ACK REGISTERED").await;
    fx.forwarder.set_response(None);
    let outcome = send(&fx.handler, "REGISTER W1").await;
    assert_eq!(outcome, SessionOutcome::reply(Reply::ServerUnavailable));
    assert!(!outcome.close);
}

#[tokio::test]
async fn data_rejections_leave_buffer_unchanged() {
    let fx = fixture(ForwardMode::Batch, "ACK REGISTERED").await;

    let outcome = send(&fx.handler, "DATA W1 HUMIDITY 50").await;
    assert_eq!(outcome, SessionOutcome::reply(Reply::RoutingNotFound));
    let outcome = send(&fx.handler, "DATA W3 TEMP 20").await;
    assert_eq!(outcome, SessionOutcome::reply(Reply::RoutingNotFound));

    for value in ["41", "-1", "abc"] {
        let outcome = send(&fx.handler, &format!("DATA W1 TEMP {value}")).await;
        assert_eq!(outcome, SessionOutcome::reply(Reply::PreprocessingFailed));
    }
    assert_eq!(fx.pipeline.pending().await, 0);
}

#[tokio::test]
async fn accepted_data_is_buffered_silently() {
    let fx = fixture(ForwardMode::Batch, "ACK REGISTERED").await;
    assert_eq!(send(&fx.handler, "DATA W1 TEMP 25").await, SessionOutcome::silent());
    // 不要求预处理的指标不做范围检查
    assert_eq!(send(&fx.handler, "DATA W1 WIND 999").await, SessionOutcome::silent());
    assert_eq!(fx.pipeline.pending().await, 2);
    assert!(fx.forwarder.sent().is_empty());
}

#[tokio::test]
async fn immediate_mode_forwards_to_rule_destination() {
    let fx = fixture(ForwardMode::Immediate, "100 OK").await;
    let outcome = send(&fx.handler, "DATA W1 TEMP 25").await;
    assert_eq!(
        outcome,
        SessionOutcome::reply(Reply::Relayed("100 OK".to_string()))
    );
    assert_eq!(
        fx.forwarder.sent(),
        vec![(ServerRequest::Forward("DATA W1 TEMP 25".to_string()), rule_dest())]
    );
    assert_eq!(fx.pipeline.pending().await, 0);

    fx.forwarder.set_response(None);
    let outcome = send(&fx.handler, "DATA W1 TEMP 25").await;
    assert_eq!(outcome, SessionOutcome::reply(Reply::ServerUnavailable));
}

#[tokio::test]
async fn quit_flushes_and_closes() {
    let fx = fixture(ForwardMode::Batch, "ACK REGISTERED").await;
    send(&fx.handler, "DATA W1 TEMP 25").await;

    let outcome = send(&fx.handler, "QUIT").await;
    assert_eq!(outcome, SessionOutcome::reply_and_close(Reply::Bye));
    assert_eq!(fx.pipeline.pending().await, 0);

    let sent = fx.sink_forwarder.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, rule_dest());
}

#[tokio::test]
async fn quit_with_empty_buffer_makes_no_delivery() {
    let fx = fixture(ForwardMode::Batch, "ACK REGISTERED").await;
    let outcome = send(&fx.handler, "QUIT").await;
    assert!(outcome.close);
    assert!(fx.sink_forwarder.sent().is_empty());
}

#[tokio::test]
async fn empty_tables_reject_everything() {
    let registry = Arc::new(StateRegistry::in_memory(Arc::new(StaticTableSource::empty())));
    let forwarder = Arc::new(RecordingForwarder::replying("ACK REGISTERED"));
    let pipeline = Pipeline::new(Arc::new(InlineForwardSink::new(forwarder.clone())));
    let handler = DeviceCommandHandler::new(
        registry,
        pipeline,
        forwarder.clone(),
        server(),
        ForwardMode::Batch,
    );
    assert_eq!(
        send(&handler, "REGISTER W1").await,
        SessionOutcome::reply(Reply::NotAssociated)
    );
    assert_eq!(
        send(&handler, "DATA W1 TEMP 20").await,
        SessionOutcome::reply(Reply::RoutingNotFound)
    );
    assert!(forwarder.sent().is_empty());
}
