//! # session：会话端点与链路注册表
//!
//! ## 核心意图（Why）
//! - 会话按名称登记发送端与接收端链路，同名同角色最多只有一条“存活”链路；
//! - 已经双向关闭、但尚未释放的旧链路转入滞留集合，名称可以立即复用；
//! - 字节计数与窗口只做记账，不做流控决策。
//!
//! ## 契约（What）
//! - 会话创建时持有连接一份引用，终结时归还；
//! - 释放钩子先摘出连接的会话集合，再依次释放发送端、接收端、滞留链路。

use std::collections::BTreeMap;

use crate::{
    Connection,
    arena::define_handle,
    config::SessionDefaults,
    endpoint::{EndpointHeader, EndpointId, EndpointState, impl_endpoint_via_header},
    error::{EngineError, Result},
    event::{EventContext, EventType},
    link::{Link, LinkId, Role},
    list::ListLinks,
};

define_handle!(
    /// 会话句柄，仅在签发它的连接内有效。
    SessionId,
    "session"
);

/// 会话端点。
///
/// 通过 [`Connection::session_ref`] 获得只读视图；所有修改都经由 [`Connection`] 的方法完成。
#[derive(Debug)]
pub struct Session {
    pub(crate) header: EndpointHeader,
    pub(crate) order: ListLinks<SessionId>,
    pub(crate) senders: BTreeMap<String, LinkId>,
    pub(crate) receivers: BTreeMap<String, LinkId>,
    pub(crate) lingering: Vec<LinkId>,
    pub(crate) incoming_capacity: usize,
    pub(crate) incoming_bytes: usize,
    pub(crate) outgoing_bytes: usize,
    pub(crate) incoming_deliveries: usize,
    pub(crate) outgoing_deliveries: usize,
    pub(crate) outgoing_window: u32,
}

impl_endpoint_via_header!(Session);

impl Session {
    pub(crate) fn new(defaults: SessionDefaults) -> Self {
        Self {
            header: EndpointHeader::new(),
            order: ListLinks::default(),
            senders: BTreeMap::new(),
            receivers: BTreeMap::new(),
            lingering: Vec::new(),
            incoming_capacity: defaults.incoming_capacity,
            incoming_bytes: 0,
            outgoing_bytes: 0,
            incoming_deliveries: 0,
            outgoing_deliveries: 0,
            outgoing_window: defaults.outgoing_window,
        }
    }

    pub(crate) fn order_links(
        sessions: &mut crate::arena::Arena<Session>,
        id: SessionId,
    ) -> Option<&mut ListLinks<SessionId>> {
        sessions.get_mut(id.0).map(|session| &mut session.order)
    }

    fn registry(&self, role: Role) -> &BTreeMap<String, LinkId> {
        match role {
            Role::Sender => &self.senders,
            Role::Receiver => &self.receivers,
        }
    }

    pub(crate) fn registry_mut(&mut self, role: Role) -> &mut BTreeMap<String, LinkId> {
        match role {
            Role::Sender => &mut self.senders,
            Role::Receiver => &mut self.receivers,
        }
    }

    /// 按名称查找存活的发送端链路。
    pub fn sender(&self, name: &str) -> Option<LinkId> {
        self.senders.get(name).copied()
    }

    /// 按名称查找存活的接收端链路。
    pub fn receiver(&self, name: &str) -> Option<LinkId> {
        self.receivers.get(name).copied()
    }

    /// 已被同名新链路取代、等待释放的旧链路。
    pub fn lingering(&self) -> &[LinkId] {
        &self.lingering
    }

    pub fn incoming_capacity(&self) -> usize {
        self.incoming_capacity
    }

    pub fn incoming_bytes(&self) -> usize {
        self.incoming_bytes
    }

    pub fn outgoing_bytes(&self) -> usize {
        self.outgoing_bytes
    }

    pub fn incoming_deliveries(&self) -> usize {
        self.incoming_deliveries
    }

    pub fn outgoing_deliveries(&self) -> usize {
        self.outgoing_deliveries
    }

    pub fn outgoing_window(&self) -> u32 {
        self.outgoing_window
    }
}

impl Connection {
    /// 新建会话并追加到会话集合末尾。
    ///
    /// - **契约 (What)**：新会话持有连接一份引用；绑定收集器时投递 `SESSION_INIT`。
    pub fn session(&mut self) -> SessionId {
        let id = SessionId(self.endpoints.sessions.insert(Session::new(self.config.session)));
        self.session_order
            .push_back(&mut self.endpoints.sessions, id, Session::order_links);
        self.endpoints.connection.refcount += 1;
        self.put_event(EventType::SessionInit, EventContext::Session(id));
        tracing::debug!(session = %id, "session created");
        id
    }

    /// 会话只读视图。
    pub fn session_ref(&self, id: SessionId) -> Result<&Session> {
        self.endpoints
            .sessions
            .get(id.0)
            .ok_or(EngineError::UnknownSession(id))
    }

    pub(crate) fn session_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.endpoints
            .sessions
            .get_mut(id.0)
            .ok_or(EngineError::UnknownSession(id))
    }

    /// 获取或创建名为 `name` 的发送端链路。
    pub fn sender(&mut self, session: SessionId, name: &str) -> Result<LinkId> {
        self.link_for(session, name, Role::Sender)
    }

    /// 获取或创建名为 `name` 的接收端链路。
    pub fn receiver(&mut self, session: SessionId, name: &str) -> Result<LinkId> {
        self.link_for(session, name, Role::Receiver)
    }

    /// 注册表查找与同名复用。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 未登记：新建链路并登记；
    ///   - 已登记且本地、远端均为 `CLOSED`：旧链路移入滞留集合，以同名新建；
    ///   - 其他情况：返回已登记的链路，不产生任何事件。
    /// - **风险 (Trade-offs)**：滞留链路直到会话释放或调用方显式 `free` 才会回收。
    fn link_for(&mut self, session: SessionId, name: &str, role: Role) -> Result<LinkId> {
        let existing = self.session_ref(session)?.registry(role).get(name).copied();
        if let Some(link) = existing {
            let header = &self.link_ref(link)?.header;
            let closed = header.local_state == EndpointState::Closed
                && header.remote_state == EndpointState::Closed;
            if !closed {
                return Ok(link);
            }
            let session_entry = self.session_mut(session)?;
            session_entry.registry_mut(role).remove(name);
            session_entry.lingering.push(link);
            tracing::debug!(%session, %link, name, "closed link moved to lingering set");
        }

        let id = LinkId(
            self.endpoints
                .links
                .insert(Link::new(session, name.to_owned(), role)),
        );
        self.link_order
            .push_back(&mut self.endpoints.links, id, Link::order_links);
        let session_entry = self.session_mut(session)?;
        session_entry.registry_mut(role).insert(name.to_owned(), id);
        session_entry.header.refcount += 1;
        self.put_event(EventType::LinkInit, EventContext::Link(id));
        tracing::debug!(%session, link = %id, name, %role, "link created");
        Ok(id)
    }

    /// 设置会话发送窗口。
    ///
    /// - **契约 (What)**：`window ∉ [0, 2^32-1]` 时返回
    ///   [`EngineError::InvalidArgument`] 且不修改任何状态。
    pub fn set_outgoing_window(&mut self, session: SessionId, window: i64) -> Result<()> {
        let window = match u32::try_from(window) {
            Ok(window) => window,
            Err(_) => {
                tracing::warn!(%session, window, "rejected outgoing window");
                return Err(EngineError::InvalidArgument {
                    argument: "outgoing_window",
                    detail: format!("{window} is outside [0, {}]", u32::MAX),
                });
            }
        };
        self.session_mut(session)?.outgoing_window = window;
        Ok(())
    }

    pub fn set_incoming_capacity(&mut self, session: SessionId, capacity: usize) -> Result<()> {
        self.session_mut(session)?.incoming_capacity = capacity;
        Ok(())
    }

    /// 会话释放钩子：摘出会话集合，释放全部链路。
    pub(crate) fn free_session_children(&mut self, id: SessionId) -> Result<()> {
        self.session_order
            .remove(&mut self.endpoints.sessions, id, Session::order_links);

        let session = self.session_mut(id)?;
        let senders = std::mem::take(&mut session.senders);
        let receivers = std::mem::take(&mut session.receivers);
        let lingering = std::mem::take(&mut session.lingering);
        for link in senders
            .into_values()
            .chain(receivers.into_values())
            .chain(lingering)
        {
            self.free(EndpointId::Link(link))?;
        }
        Ok(())
    }

    /// 把会话及其名下链路全部标记为脏。
    pub(crate) fn modify_session_endpoints(&mut self, id: SessionId) -> Result<()> {
        let links: Vec<LinkId> = {
            let session = self.session_ref(id)?;
            session
                .senders
                .values()
                .chain(session.receivers.values())
                .chain(session.lingering.iter())
                .copied()
                .collect()
        };
        for link in links {
            if !self.link_ref(link)?.header.freed {
                self.modified(link, true)?;
            }
        }
        if !self.session_ref(id)?.header.freed {
            self.modified(id, true)?;
        }
        Ok(())
    }
}
