//! 会话与链路集合的状态过滤枚举。

use spark_amqp::{Connection, EndpointState, StateFilter};

#[test]
fn session_head_and_next_skip_non_matching() {
    let mut connection = Connection::new();
    let first = connection.session();
    let closed = connection.session();
    let third = connection.session();

    for session in [first, third] {
        connection.open(session).unwrap();
        connection
            .set_remote_state(session, EndpointState::Active)
            .unwrap();
    }
    connection.open(closed).unwrap();
    connection.close(closed).unwrap();
    connection
        .set_remote_state(closed, EndpointState::Closed)
        .unwrap();

    let active = StateFilter::ACTIVE;
    assert_eq!(connection.session_head(active, active), Some(first));
    assert_eq!(
        connection.session_next(first, active, active).unwrap(),
        Some(third)
    );
    assert_eq!(connection.session_next(third, active, active).unwrap(), None);

    let closed_filter = StateFilter::from(EndpointState::Closed);
    assert_eq!(
        connection.session_head(closed_filter, closed_filter),
        Some(closed)
    );
}

#[test]
fn any_filter_walks_insertion_order() {
    let mut connection = Connection::new();
    let sessions: Vec<_> = (0..4).map(|_| connection.session()).collect();

    let mut seen = Vec::new();
    let mut cursor = connection.session_head(StateFilter::ANY, StateFilter::ANY);
    while let Some(session) = cursor {
        seen.push(session);
        cursor = connection
            .session_next(session, StateFilter::ANY, StateFilter::ANY)
            .unwrap();
    }
    assert_eq!(seen, sessions);
    assert_eq!(connection.session_head(StateFilter::NONE, StateFilter::ANY), None);
}

#[test]
fn removed_session_keeps_forward_pointer() {
    let mut connection = Connection::new();
    let first = connection.session();
    let middle = connection.session();
    let last = connection.session();

    // 额外持有一份引用，释放后槽位仍然存活。
    connection.incref(middle).unwrap();
    connection.free(middle).unwrap();

    let any = StateFilter::ANY;
    assert_eq!(connection.session_head(any, any), Some(first));
    assert_eq!(connection.session_next(first, any, any).unwrap(), Some(last));
    assert_eq!(connection.session_next(middle, any, any).unwrap(), Some(last));
    assert_eq!(connection.session_count(), 2);
}

#[test]
fn parked_traversal_survives_later_reaping() {
    let mut connection = Connection::new();
    let sessions: Vec<_> = (0..4).map(|_| connection.session()).collect();
    connection.incref(sessions[1]).unwrap();
    connection.free(sessions[1]).unwrap();
    connection.free(sessions[2]).unwrap();

    let any = StateFilter::ANY;
    assert!(connection.session_ref(sessions[2]).is_err());
    assert_eq!(
        connection.session_next(sessions[1], any, any).unwrap(),
        Some(sessions[3])
    );
    assert_eq!(
        connection.session_next(sessions[2], any, any).unwrap(),
        Some(sessions[3])
    );
    assert_eq!(
        connection.session_next(sessions[0], any, any).unwrap(),
        Some(sessions[3])
    );

    let session = sessions[0];
    let links: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| connection.sender(session, name).unwrap())
        .collect();
    connection.incref(links[0]).unwrap();
    connection.free(links[0]).unwrap();
    connection.free(links[1]).unwrap();
    assert_eq!(
        connection.link_next(links[0], any, any).unwrap(),
        Some(links[2])
    );
}

#[test]
fn link_filters_combine_local_and_remote() {
    let mut connection = Connection::new();
    let session = connection.session();
    let sender = connection.sender(session, "out").unwrap();
    let receiver = connection.receiver(session, "in").unwrap();
    connection.open(sender).unwrap();

    assert_eq!(
        connection.link_head(StateFilter::ACTIVE, StateFilter::ANY),
        Some(sender)
    );
    assert_eq!(
        connection.link_head(StateFilter::UNINITIALIZED, StateFilter::ANY),
        Some(receiver)
    );
    assert_eq!(
        connection.link_head(StateFilter::ACTIVE, StateFilter::ACTIVE),
        None
    );

    let either = StateFilter::of(&[EndpointState::Uninitialized, EndpointState::Active]);
    assert_eq!(connection.link_head(either, StateFilter::ANY), Some(sender));
    assert_eq!(
        connection
            .link_next(sender, either, StateFilter::ANY)
            .unwrap(),
        Some(receiver)
    );
}
