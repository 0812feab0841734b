//! 端点生命周期：本地打开/关闭、远端状态推进、错误条件与同名链路复用。

use spark_amqp::{
    Endpoint, EndpointId, EndpointState, ErrorCondition, EventContext, EventType, RemoteOpen,
};
use tracing_test::traced_test;

use super::support::*;

#[test]
fn open_twice_emits_single_local_open() {
    let mut connection = collected_connection();
    let session = connection.session();
    connection.open(session).unwrap();
    connection.open(session).unwrap();

    assert_eq!(
        connection.local_state(session).unwrap(),
        EndpointState::Active
    );
    assert!(connection.is_modified(session).unwrap());
    assert_eq!(
        drain_types(&mut connection),
        [
            EventType::ConnectionInit,
            EventType::SessionInit,
            EventType::SessionLocalOpen
        ]
    );
}

#[test]
fn close_may_skip_active_and_never_reopens() {
    let mut connection = collected_connection();
    let session = connection.session();
    let link = connection.sender(session, "a").unwrap();
    drain_events(&mut connection);

    connection.close(link).unwrap();
    connection.open(link).unwrap();
    connection.close(link).unwrap();

    assert_eq!(connection.local_state(link).unwrap(), EndpointState::Closed);
    let events = drain_events(&mut connection);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), EventType::LinkLocalClose);
    assert_eq!(events[0].context(), EventContext::Link(link));
}

#[test]
fn collect_replays_init_for_existing_endpoints() {
    let mut connection = spark_amqp::Connection::new();
    let first = connection.session();
    let second = connection.session();
    let link = connection.receiver(second, "in").unwrap();

    assert!(connection.collect(spark_amqp::Collector::new()).is_none());
    let contexts: Vec<_> = drain_events(&mut connection)
        .into_iter()
        .map(|event| (event.event_type(), event.context()))
        .collect();
    assert_eq!(
        contexts,
        [
            (EventType::ConnectionInit, EventContext::Connection),
            (EventType::SessionInit, EventContext::Session(first)),
            (EventType::SessionInit, EventContext::Session(second)),
            (EventType::LinkInit, EventContext::Link(link)),
        ]
    );

    connection.open(first).unwrap();
    let previous = connection
        .collect(spark_amqp::Collector::new())
        .expect("previous collector returned");
    assert_eq!(previous.len(), 1);
    assert!(connection.take_collector().is_some());
    assert!(connection.collector().is_none());
}

#[test]
#[traced_test]
fn remote_state_only_moves_forward() {
    let mut connection = collected_connection();
    let session = connection.session();
    drain_events(&mut connection);

    connection
        .set_remote_state(session, EndpointState::Active)
        .unwrap();
    connection
        .set_remote_state(session, EndpointState::Closed)
        .unwrap();
    connection
        .set_remote_state(session, EndpointState::Active)
        .unwrap();

    assert_eq!(
        connection.remote_state(session).unwrap(),
        EndpointState::Closed
    );
    assert_eq!(
        drain_types(&mut connection),
        [EventType::SessionRemoteOpen, EventType::SessionRemoteClose]
    );
    assert!(logs_contain("ignored backward remote transition"));
}

#[test]
fn remote_open_records_peer_fields() {
    let mut connection = collected_connection();
    drain_events(&mut connection);

    connection
        .handle_remote_open(RemoteOpen {
            container_id: Some("peer".to_owned()),
            hostname: Some("vhost".to_owned()),
            offered_capabilities: vec!["ANONYMOUS-RELAY".to_owned()],
            desired_capabilities: Vec::new(),
        })
        .unwrap();

    assert_eq!(
        connection.remote_state(EndpointId::Connection).unwrap(),
        EndpointState::Active
    );
    assert_eq!(connection.remote().container_id.as_deref(), Some("peer"));
    assert_eq!(connection.remote().offered_capabilities, ["ANONYMOUS-RELAY"]);
    assert_eq!(
        drain_types(&mut connection),
        [EventType::ConnectionRemoteOpen]
    );
}

#[test]
fn conditions_are_kept_per_endpoint() {
    let mut connection = spark_amqp::Connection::new();
    let session = connection.session();
    let link = connection.sender(session, "a").unwrap();

    connection
        .set_condition(link, ErrorCondition::new("amqp:internal-error", "boom"))
        .unwrap();
    connection
        .set_remote_condition(session, ErrorCondition::new("amqp:not-found", "gone"))
        .unwrap();

    assert_eq!(
        connection.condition(link).unwrap().condition.as_deref(),
        Some("amqp:internal-error")
    );
    assert!(!connection.condition(session).unwrap().is_set());
    assert_eq!(
        connection
            .remote_condition(session)
            .unwrap()
            .description
            .as_deref(),
        Some("gone")
    );
}

#[test]
fn closed_link_name_is_reused() {
    let mut connection = spark_amqp::Connection::new();
    let session = connection.session();
    let first = connection.sender(session, "orders").unwrap();
    assert_eq!(connection.sender(session, "orders").unwrap(), first);

    connection.close(first).unwrap();
    assert_eq!(connection.sender(session, "orders").unwrap(), first);

    connection
        .set_remote_state(first, EndpointState::Closed)
        .unwrap();
    let second = connection.sender(session, "orders").unwrap();
    assert_ne!(second, first);

    let old = connection.link_ref(first).unwrap();
    assert_eq!(old.local_state(), EndpointState::Closed);
    assert_eq!(old.remote_state(), EndpointState::Closed);
    assert!(!old.is_freed());

    let view = connection.session_ref(session).unwrap();
    assert_eq!(view.sender("orders"), Some(second));
    assert_eq!(view.lingering(), [first]);

    let receiver = connection.receiver(session, "orders").unwrap();
    assert_ne!(receiver, second);
    assert_eq!(connection.link_count(), 3);
}
