//! 引用计数、释放钩子与终结事件。

use spark_amqp::{Connection, EndpointId, EngineError, EventContext, EventType};

use super::support::*;

#[test]
fn freeing_sessions_restores_connection_refcount() {
    const N: usize = 5;
    let mut connection = collected_connection();
    assert_eq!(connection.refcount(EndpointId::Connection).unwrap(), 1);

    let sessions: Vec<_> = (0..N).map(|_| connection.session()).collect();
    assert_eq!(connection.refcount(EndpointId::Connection).unwrap(), 1 + N);

    for session in &sessions {
        connection.free(*session).unwrap();
    }
    assert_eq!(connection.refcount(EndpointId::Connection).unwrap(), 1);
    assert_eq!(connection.session_count(), 0);

    let finals = drain_types(&mut connection)
        .into_iter()
        .filter(|t| *t == EventType::SessionFinal)
        .count();
    assert_eq!(finals, N);
}

#[test]
fn freeing_a_session_frees_its_links_first() {
    let mut connection = collected_connection();
    let session = connection.session();
    let sender = connection.sender(session, "out").unwrap();
    let receiver = connection.receiver(session, "in").unwrap();
    assert_eq!(connection.refcount(session).unwrap(), 3);
    drain_events(&mut connection);

    connection.free(session).unwrap();

    let events: Vec<_> = drain_events(&mut connection)
        .into_iter()
        .map(|event| (event.event_type(), event.context()))
        .collect();
    assert_eq!(
        events,
        [
            (EventType::LinkFinal, EventContext::Link(sender)),
            (EventType::LinkFinal, EventContext::Link(receiver)),
            (EventType::SessionFinal, EventContext::Session(session)),
        ]
    );
    assert!(matches!(
        connection.link_ref(sender),
        Err(EngineError::UnknownLink(id)) if id == sender
    ));
    assert_eq!(connection.link_count(), 0);
}

#[test]
fn unsettled_delivery_keeps_link_alive_until_reaped() {
    let mut connection = collected_connection();
    let (session, sender) = open_sender(&mut connection, "out", 1);
    let delivery = connection.delivery(sender, &b"d1"[..]).unwrap();
    connection.send(delivery, b"payload").unwrap();
    assert_eq!(connection.refcount(sender).unwrap(), 2);
    drain_events(&mut connection);

    connection.free(sender).unwrap();
    assert!(connection.is_freed(sender).unwrap());
    assert!(connection.is_settled(delivery));
    assert_eq!(connection.refcount(sender).unwrap(), 1);
    assert!(!drain_types(&mut connection).contains(&EventType::LinkFinal));

    connection.remove_transport_work(delivery).unwrap();
    assert!(connection.delivery_ref(delivery).is_err());
    assert!(connection.link_ref(sender).is_err());
    assert_eq!(
        drain_types(&mut connection),
        [EventType::LinkFinal]
    );
    assert_eq!(connection.refcount(session).unwrap(), 1);
}

#[test]
fn free_is_idempotent_even_after_reaping() {
    let mut connection = Connection::new();
    let session = connection.session();
    connection.free(session).unwrap();
    connection.free(session).unwrap();

    let err = connection.open(session).unwrap_err();
    assert!(matches!(err, EngineError::UnknownSession(id) if id == session));
    assert_eq!(err.code(), "amqp.session.unknown");
}

#[test]
fn freeing_the_connection_finalizes_everything() {
    let mut connection = collected_connection();
    let first = connection.session();
    let second = connection.session();
    connection.sender(second, "out").unwrap();
    drain_events(&mut connection);

    connection.free(EndpointId::Connection).unwrap();

    let types = drain_types(&mut connection);
    assert_eq!(
        types,
        [
            EventType::SessionFinal,
            EventType::LinkFinal,
            EventType::SessionFinal,
            EventType::ConnectionFinal,
        ]
    );
    assert!(connection.session_ref(first).is_err());
    assert_eq!(connection.refcount(EndpointId::Connection).unwrap(), 0);
}

#[test]
fn connection_finalizes_only_once() {
    let mut connection = collected_connection();
    drain_events(&mut connection);
    connection.free(EndpointId::Connection).unwrap();
    assert_eq!(drain_types(&mut connection), [EventType::ConnectionFinal]);

    let late = connection.session();
    connection.free(late).unwrap();
    let (transport, _) = recording_transport();
    connection.bind_transport(transport).unwrap();
    connection.unbind_transport().unwrap();

    let types = drain_types(&mut connection);
    assert!(types.contains(&EventType::SessionFinal));
    assert!(types.contains(&EventType::ConnectionUnbound));
    assert!(!types.contains(&EventType::ConnectionFinal));
    assert_eq!(connection.refcount(EndpointId::Connection).unwrap(), 0);
}

#[test]
#[should_panic(expected = "refcount underflow")]
fn decref_of_finalized_connection_panics() {
    let mut connection = Connection::new();
    connection.free(EndpointId::Connection).unwrap();
    let _ = connection.decref(EndpointId::Connection);
}
