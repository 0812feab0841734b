//! 传输驱动绑定、脏端点唤醒与配置注入。

use spark_amqp::{Connection, EndpointId, EngineConfig, EngineError, EventType};
use tracing_test::traced_test;

use super::support::*;

#[test]
fn binding_marks_every_endpoint_modified() {
    let mut connection = collected_connection();
    let session = connection.session();
    let link = connection.sender(session, "out").unwrap();
    drain_events(&mut connection);
    let (transport, log) = recording_transport();

    assert!(connection.bind_transport(transport).unwrap().is_none());

    assert_eq!(
        drain_types(&mut connection),
        [EventType::ConnectionBound, EventType::Transport]
    );
    assert_eq!(log.lock().unwrap().notifications, 3);
    assert_eq!(connection.modified_head(), Some(EndpointId::Link(link)));
    assert_eq!(
        connection.modified_next(link).unwrap(),
        Some(EndpointId::Session(session))
    );
    assert_eq!(
        connection.modified_next(session).unwrap(),
        Some(EndpointId::Connection)
    );
    assert_eq!(connection.refcount(EndpointId::Connection).unwrap(), 3);
    assert!(connection.has_transport());
}

#[test]
fn unbinding_returns_reference() {
    let mut connection = collected_connection();
    let (transport, _log) = recording_transport();
    connection.bind_transport(transport).unwrap();
    drain_events(&mut connection);

    assert!(connection.unbind_transport().unwrap().is_some());
    assert!(connection.unbind_transport().unwrap().is_none());
    assert_eq!(connection.refcount(EndpointId::Connection).unwrap(), 1);
    assert_eq!(
        drain_types(&mut connection),
        [EventType::ConnectionUnbound]
    );
}

#[test]
fn rebinding_replaces_previous_transport() {
    let mut connection = Connection::new();
    let (first, first_log) = recording_transport();
    let (second, second_log) = recording_transport();
    connection.bind_transport(first).unwrap();
    assert!(connection.bind_transport(second).unwrap().is_some());
    assert_eq!(connection.refcount(EndpointId::Connection).unwrap(), 2);

    let session = connection.session();
    connection.open(session).unwrap();
    assert_eq!(first_log.lock().unwrap().notifications, 1);
    assert_eq!(second_log.lock().unwrap().notifications, 2);
}

#[test]
fn local_open_wakes_bound_transport() {
    let mut connection = collected_connection();
    let (transport, log) = recording_transport();
    connection.bind_transport(transport).unwrap();
    let session = connection.session();
    drain_events(&mut connection);

    connection.open(session).unwrap();
    assert_eq!(
        drain_types(&mut connection),
        [EventType::SessionLocalOpen, EventType::Transport]
    );
    assert_eq!(log.lock().unwrap().notifications, 2);
}

#[test]
#[traced_test]
fn outgoing_window_must_fit_u32() {
    let mut connection = Connection::new();
    let session = connection.session();

    for window in [-1_i64, 4_294_967_296] {
        let err = connection.set_outgoing_window(session, window).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidArgument {
                argument: "outgoing_window",
                ..
            }
        ));
    }
    assert_eq!(
        connection.session_ref(session).unwrap().outgoing_window(),
        2_147_483_647
    );

    connection
        .set_outgoing_window(session, 4_294_967_295)
        .unwrap();
    assert_eq!(
        connection.session_ref(session).unwrap().outgoing_window(),
        u32::MAX
    );
    assert!(logs_contain("rejected outgoing window"));
}

#[test]
fn configuration_seeds_connection_and_sessions() {
    let config = EngineConfig::from_toml_str(
        r#"
        container_id = "edge-1"
        hostname = "vhost-a"
        max_channels = 32

        [session]
        incoming_capacity = 4096
        outgoing_window = 64
        "#,
    )
    .unwrap();
    let mut connection = Connection::with_config(config);
    assert_eq!(connection.container_id(), "edge-1");
    assert_eq!(connection.hostname(), Some("vhost-a"));
    assert_eq!(connection.max_channels(), 32);

    let session = connection.session();
    let view = connection.session_ref(session).unwrap();
    assert_eq!(view.incoming_capacity(), 4096);
    assert_eq!(view.outgoing_window(), 64);

    connection.set_incoming_capacity(session, 8192).unwrap();
    assert_eq!(
        connection.session_ref(session).unwrap().incoming_capacity(),
        8192
    );
}
