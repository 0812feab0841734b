//! 测试夹具：连接构造器、事件排空与记录型传输驱动。

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use spark_amqp::{
    Codec, CodecError, Collector, Connection, DeliveryId, EndpointId, Event, EventType, LinkId,
    SessionId, Transport,
};

/// 绑定了收集器的新连接。
pub fn collected_connection() -> Connection {
    let mut connection = Connection::new();
    connection.collect(Collector::new());
    connection
}

/// 排空收集器，返回事件序列。
pub fn drain_events(connection: &mut Connection) -> Vec<Event> {
    connection
        .collector_mut()
        .map(|collector| collector.drain().collect())
        .unwrap_or_default()
}

pub fn drain_types(connection: &mut Connection) -> Vec<EventType> {
    drain_events(connection)
        .into_iter()
        .map(|event| event.event_type())
        .collect()
}

/// 打开连接、会话与指定角色的链路。
pub fn open_session(connection: &mut Connection) -> SessionId {
    let session = connection.session();
    connection.open(EndpointId::Connection).unwrap();
    connection.open(session).unwrap();
    session
}

pub fn open_sender(connection: &mut Connection, name: &str, credit: i32) -> (SessionId, LinkId) {
    let session = open_session(connection);
    let sender = connection.sender(session, name).unwrap();
    connection.open(sender).unwrap();
    connection.set_credit(sender, credit).unwrap();
    (session, sender)
}

pub fn open_receiver(connection: &mut Connection, session: SessionId, name: &str) -> LinkId {
    let receiver = connection.receiver(session, name).unwrap();
    connection.open(receiver).unwrap();
    receiver
}

pub fn work_list(connection: &Connection) -> Vec<DeliveryId> {
    connection.work_sequence().collect()
}

pub fn transport_work_list(connection: &Connection) -> Vec<DeliveryId> {
    let mut out = Vec::new();
    let mut cursor = connection.transport_work_head();
    while let Some(delivery) = cursor {
        out.push(delivery);
        cursor = connection.transport_work_next(delivery).unwrap();
    }
    out
}

/// 传输驱动观察到的回调。
#[derive(Debug, Default)]
pub struct TransportLog {
    pub notifications: usize,
    pub settled: Vec<DeliveryId>,
}

/// 把回调写入共享日志的传输驱动。
pub struct RecordingTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl Transport for RecordingTransport {
    fn notify_modified(&mut self) {
        self.log.lock().unwrap().notifications += 1;
    }

    fn delivery_settled(&mut self, delivery: DeliveryId) {
        self.log.lock().unwrap().settled.push(delivery);
    }
}

pub fn recording_transport() -> (Box<dyn Transport>, Arc<Mutex<TransportLog>>) {
    let log = Arc::new(Mutex::new(TransportLog::default()));
    (
        Box::new(RecordingTransport {
            log: Arc::clone(&log),
        }),
        log,
    )
}

/// u16 长度前缀的 UTF-8 字符串编解码器。
pub struct Utf8Frames;

impl Codec for Utf8Frames {
    type Incoming = String;
    type Outgoing = str;

    fn encode(&self, item: &str, dst: &mut BytesMut) -> Result<(), CodecError> {
        let len = u16::try_from(item.len()).map_err(|_| CodecError::Invalid {
            detail: "frame longer than u16::MAX".to_owned(),
        })?;
        dst.put_u16(len);
        dst.put_slice(item.as_bytes());
        Ok(())
    }

    fn decode(&self, src: &mut Bytes) -> Result<String, CodecError> {
        if src.len() < 2 {
            return Err(CodecError::Truncated {
                needed: 2,
                available: src.len(),
            });
        }
        let len = usize::from(u16::from_be_bytes([src[0], src[1]]));
        if src.len() < 2 + len {
            return Err(CodecError::Truncated {
                needed: 2 + len,
                available: src.len(),
            });
        }
        src.advance(2);
        let body = src.split_to(len);
        String::from_utf8(body.to_vec()).map_err(|err| CodecError::Invalid {
            detail: err.to_string(),
        })
    }
}
