//! # event：生命周期事件与收集器
//!
//! ## 核心意图（Why）
//! - 引擎本身不回调任何用户代码，所有“发生了什么”都以 [`Event`] 的形式写入连接持有的
//!   [`Collector`]，由嵌入方在驱动循环中自行排空；
//! - 事件上下文只携带句柄（[`EventContext`]），不借出对象引用，排空事件时可以自由地再次
//!   可变访问连接。
//!
//! ## 契约（What）
//! - 连续两次投递相同 `(类型, 上下文)` 时后一次被合并，`put` 返回 `None`；
//! - [`Collector::free`] 之后丢弃积压事件并忽略后续投递。

use std::collections::VecDeque;

use core::fmt;

use crate::{delivery::DeliveryId, endpoint::EndpointId, link::LinkId, session::SessionId};

/// 事件类型。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventType {
    ConnectionInit,
    ConnectionBound,
    ConnectionUnbound,
    ConnectionLocalOpen,
    ConnectionLocalClose,
    ConnectionRemoteOpen,
    ConnectionRemoteClose,
    ConnectionFinal,
    SessionInit,
    SessionLocalOpen,
    SessionLocalClose,
    SessionRemoteOpen,
    SessionRemoteClose,
    SessionFinal,
    LinkInit,
    LinkLocalOpen,
    LinkLocalClose,
    LinkRemoteOpen,
    LinkRemoteClose,
    LinkFlow,
    LinkFinal,
    /// 投递的远端处置或远端结算发生变化。
    Delivery,
    /// 传输层有新的输出机会。
    Transport,
}

impl EventType {
    /// 稳定的大写名称，用于日志字段。
    pub fn name(self) -> &'static str {
        match self {
            EventType::ConnectionInit => "CONNECTION_INIT",
            EventType::ConnectionBound => "CONNECTION_BOUND",
            EventType::ConnectionUnbound => "CONNECTION_UNBOUND",
            EventType::ConnectionLocalOpen => "CONNECTION_LOCAL_OPEN",
            EventType::ConnectionLocalClose => "CONNECTION_LOCAL_CLOSE",
            EventType::ConnectionRemoteOpen => "CONNECTION_REMOTE_OPEN",
            EventType::ConnectionRemoteClose => "CONNECTION_REMOTE_CLOSE",
            EventType::ConnectionFinal => "CONNECTION_FINAL",
            EventType::SessionInit => "SESSION_INIT",
            EventType::SessionLocalOpen => "SESSION_LOCAL_OPEN",
            EventType::SessionLocalClose => "SESSION_LOCAL_CLOSE",
            EventType::SessionRemoteOpen => "SESSION_REMOTE_OPEN",
            EventType::SessionRemoteClose => "SESSION_REMOTE_CLOSE",
            EventType::SessionFinal => "SESSION_FINAL",
            EventType::LinkInit => "LINK_INIT",
            EventType::LinkLocalOpen => "LINK_LOCAL_OPEN",
            EventType::LinkLocalClose => "LINK_LOCAL_CLOSE",
            EventType::LinkRemoteOpen => "LINK_REMOTE_OPEN",
            EventType::LinkRemoteClose => "LINK_REMOTE_CLOSE",
            EventType::LinkFlow => "LINK_FLOW",
            EventType::LinkFinal => "LINK_FINAL",
            EventType::Delivery => "DELIVERY",
            EventType::Transport => "TRANSPORT",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 事件上下文：指向触发事件的对象。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventContext {
    Connection,
    Session(SessionId),
    Link(LinkId),
    Delivery(DeliveryId),
    Transport,
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventContext::Connection => f.write_str("connection"),
            EventContext::Session(id) => fmt::Display::fmt(id, f),
            EventContext::Link(id) => fmt::Display::fmt(id, f),
            EventContext::Delivery(id) => fmt::Display::fmt(id, f),
            EventContext::Transport => f.write_str("transport"),
        }
    }
}

impl From<EndpointId> for EventContext {
    fn from(id: EndpointId) -> Self {
        match id {
            EndpointId::Connection => EventContext::Connection,
            EndpointId::Session(session) => EventContext::Session(session),
            EndpointId::Link(link) => EventContext::Link(link),
        }
    }
}

/// 一条事件记录。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Event {
    event_type: EventType,
    context: EventContext,
}

impl Event {
    pub fn new(event_type: EventType, context: EventContext) -> Self {
        Self {
            event_type,
            context,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn context(&self) -> EventContext {
        self.context
    }
}

/// 事件收集器。
///
/// # 教案式说明
/// - **意图 (Why)**：作为引擎与嵌入方之间唯一的通知通道，按发生顺序缓存事件；
/// - **契约 (What)**：
///   - 由 [`Connection::collect`](crate::Connection::collect) 以所有权方式绑定，
///     [`Connection::take_collector`](crate::Connection::take_collector) 解绑；
///   - `put` 在收集器已释放或与队尾事件重复时返回 `None`；
/// - **风险 (Trade-offs)**：队列无上限，嵌入方需在每轮驱动后排空。
#[derive(Debug, Default)]
pub struct Collector {
    events: VecDeque<Event>,
    freed: bool,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 投递事件，返回新入队的事件。
    pub fn put(&mut self, event_type: EventType, context: EventContext) -> Option<&Event> {
        if self.freed {
            return None;
        }
        let event = Event::new(event_type, context);
        if self.events.back() == Some(&event) {
            return None;
        }
        self.events.push_back(event);
        self.events.back()
    }

    /// 查看队首事件。
    pub fn peek(&self) -> Option<&Event> {
        self.events.front()
    }

    /// 弹出队首事件。
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 按顺序排空全部事件。
    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.events.drain(..)
    }

    /// 释放收集器：丢弃积压事件，此后的投递全部忽略。
    pub fn free(&mut self) {
        self.freed = true;
        self.events.clear();
    }

    pub fn is_freed(&self) -> bool {
        self.freed
    }
}
