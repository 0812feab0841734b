//! # connection：连接端点与对象存储
//!
//! ## 核心意图（Why）
//! - 连接独占本连接内全部 Session、Link、Delivery 的存储，并维护会话集合、链路集合、
//!   脏端点列表与两条工作列表；
//! - 端点生命周期（打开、关闭、脏标记、引用计数、释放、终结）在此按 [`EndpointId`]
//!   的变体统一分派；
//! - 收集器与传输驱动都以所有权方式挂在连接上，支持绑定、替换与解绑。
//!
//! ## 契约（What）
//! - 冗余的 `open`/`close`/`free` 静默成功且不产生事件；
//! - 引用计数归零时投递 `*_FINAL` 事件并回收槽位，恰好一次；计数下溢直接 panic；
//! - 远端状态只能前进，回退请求被忽略并记录告警。
//!
//! ## 风险（Trade-offs）
//! - 单线程、非阻塞：连接可以跨线程移动，但并发访问需要外部互斥。

use core::fmt;

use crate::{
    arena::Arena,
    config::EngineConfig,
    delivery::{Delivery, DeliveryId},
    endpoint::{EndpointHeader, EndpointId, EndpointState, ErrorCondition, StateFilter},
    error::{EngineError, Result},
    event::{Collector, EventContext, EventType},
    link::{Link, LinkId},
    list::{List, ListLinks, first_linked},
    session::{Session, SessionId},
    transport::{RemoteOpen, Transport},
};

/// 端点存储：连接自身的生命周期字段与会话、链路槽位。
///
/// 脏端点列表的成员横跨三类端点，访问器需要同时看到三者，因此与各列表头分开存放。
#[derive(Debug, Default)]
pub(crate) struct Endpoints {
    pub(crate) connection: EndpointHeader,
    pub(crate) sessions: Arena<Session>,
    pub(crate) links: Arena<Link>,
}

impl Endpoints {
    fn header(&self, id: EndpointId) -> Result<&EndpointHeader> {
        match id {
            EndpointId::Connection => Ok(&self.connection),
            EndpointId::Session(s) => self
                .sessions
                .get(s.0)
                .map(|session| &session.header)
                .ok_or(EngineError::UnknownSession(s)),
            EndpointId::Link(l) => self
                .links
                .get(l.0)
                .map(|link| &link.header)
                .ok_or(EngineError::UnknownLink(l)),
        }
    }

    fn header_mut(&mut self, id: EndpointId) -> Result<&mut EndpointHeader> {
        match id {
            EndpointId::Connection => Ok(&mut self.connection),
            EndpointId::Session(s) => self
                .sessions
                .get_mut(s.0)
                .map(|session| &mut session.header)
                .ok_or(EngineError::UnknownSession(s)),
            EndpointId::Link(l) => self
                .links
                .get_mut(l.0)
                .map(|link| &mut link.header)
                .ok_or(EngineError::UnknownLink(l)),
        }
    }

    /// 存活端点或回收后槽位尚未复用的端点头部。
    fn retained_header(&self, id: EndpointId) -> Result<&EndpointHeader> {
        match id {
            EndpointId::Connection => Ok(&self.connection),
            EndpointId::Session(s) => self
                .sessions
                .get_or_retired(s.0)
                .map(|session| &session.header)
                .ok_or(EngineError::UnknownSession(s)),
            EndpointId::Link(l) => self
                .links
                .get_or_retired(l.0)
                .map(|link| &link.header)
                .ok_or(EngineError::UnknownLink(l)),
        }
    }

    fn modified_links(endpoints: &mut Endpoints, id: EndpointId) -> Option<&mut ListLinks<EndpointId>> {
        endpoints
            .header_mut(id)
            .ok()
            .map(|header| &mut header.modified_links)
    }
}

/// AMQP 连接。
///
/// # 教案式说明
/// - **意图 (Why)**：作为 sans-I/O 引擎的根对象，所有端点与投递都通过它创建、修改与查询；
/// - **契约 (What)**：
///   - 句柄（[`SessionId`]、[`LinkId`]、[`DeliveryId`]）只在签发它的连接内有效，
///     对象回收后旧句柄的查询与修改返回 `Unknown*` 错误，`*_next` 遍历在槽位复用前仍可继续；
///   - 连接初始引用计数为 1；每个会话与已绑定的传输各持有一份；
/// - **执行 (How)**：对象存放在代际槽位存储中，各集合与列表以句柄串联。
///
/// ```
/// use spark_amqp::{Collector, Connection, EventType};
///
/// let mut connection = Connection::new();
/// connection.collect(Collector::new());
/// connection.open(spark_amqp::EndpointId::Connection)?;
/// connection.open(spark_amqp::EndpointId::Connection)?;
///
/// let collector = connection.collector_mut().expect("collector bound");
/// let types: Vec<_> = collector.drain().map(|e| e.event_type()).collect();
/// assert_eq!(types, [EventType::ConnectionInit, EventType::ConnectionLocalOpen]);
/// # Ok::<(), spark_amqp::EngineError>(())
/// ```
pub struct Connection {
    pub(crate) config: EngineConfig,
    pub(crate) endpoints: Endpoints,
    pub(crate) deliveries: Arena<Delivery>,
    pub(crate) session_order: List<SessionId>,
    pub(crate) link_order: List<LinkId>,
    pub(crate) modified_list: List<EndpointId>,
    pub(crate) work: List<DeliveryId>,
    pub(crate) transport_work: List<DeliveryId>,
    pub(crate) collector: Option<Collector>,
    pub(crate) transport: Option<Box<dyn Transport>>,
    container_id: String,
    hostname: Option<String>,
    offered_capabilities: Vec<String>,
    desired_capabilities: Vec<String>,
    remote: RemoteOpen,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("container_id", &self.container_id)
            .field("local_state", &self.endpoints.connection.local_state)
            .field("remote_state", &self.endpoints.connection.remote_state)
            .field("refcount", &self.endpoints.connection.refcount)
            .field("sessions", &self.endpoints.sessions.len())
            .field("links", &self.endpoints.links.len())
            .field("deliveries", &self.deliveries.len())
            .field("transport_bound", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::with_config(EngineConfig::default())
    }
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            container_id: config.container_id.clone(),
            hostname: config.hostname.clone(),
            config,
            endpoints: Endpoints::default(),
            deliveries: Arena::new(),
            session_order: List::default(),
            link_order: List::default(),
            modified_list: List::default(),
            work: List::default(),
            transport_work: List::default(),
            collector: None,
            transport: None,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            remote: RemoteOpen::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn max_channels(&self) -> u16 {
        self.config.max_channels
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn set_container_id(&mut self, container_id: impl Into<String>) {
        self.container_id = container_id.into();
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn set_hostname(&mut self, hostname: Option<String>) {
        self.hostname = hostname;
    }

    pub fn offered_capabilities(&self) -> &[String] {
        &self.offered_capabilities
    }

    pub fn set_offered_capabilities(&mut self, capabilities: Vec<String>) {
        self.offered_capabilities = capabilities;
    }

    pub fn desired_capabilities(&self) -> &[String] {
        &self.desired_capabilities
    }

    pub fn set_desired_capabilities(&mut self, capabilities: Vec<String>) {
        self.desired_capabilities = capabilities;
    }

    /// 对端在 open 帧中声明的字段。
    pub fn remote(&self) -> &RemoteOpen {
        &self.remote
    }

    pub(crate) fn put_event(&mut self, event_type: EventType, context: EventContext) {
        if let Some(collector) = self.collector.as_mut() {
            collector.put(event_type, context);
        }
    }

    // ---- 端点生命周期 ----

    /// 本地打开端点。
    ///
    /// - **契约 (What)**：仅 `UNINITIALIZED → ACTIVE` 时投递 `*_LOCAL_OPEN` 并标记脏；
    ///   其余情况为无操作。
    pub fn open(&mut self, id: impl Into<EndpointId>) -> Result<()> {
        let id = id.into();
        let header = self.endpoints.header_mut(id)?;
        if header.local_state != EndpointState::Uninitialized {
            return Ok(());
        }
        header.local_state = EndpointState::Active;
        self.put_event(id.local_open_event(), id.into());
        tracing::debug!(endpoint = %id, "endpoint opened");
        self.modified(id, true)
    }

    /// 本地关闭端点；已经 `CLOSED` 时为无操作。
    pub fn close(&mut self, id: impl Into<EndpointId>) -> Result<()> {
        let id = id.into();
        let header = self.endpoints.header_mut(id)?;
        if header.local_state == EndpointState::Closed {
            return Ok(());
        }
        header.local_state = EndpointState::Closed;
        self.put_event(id.local_close_event(), id.into());
        tracing::debug!(endpoint = %id, "endpoint closed");
        self.modified(id, true)
    }

    pub fn local_state(&self, id: impl Into<EndpointId>) -> Result<EndpointState> {
        Ok(self.endpoints.header(id.into())?.local_state)
    }

    pub fn remote_state(&self, id: impl Into<EndpointId>) -> Result<EndpointState> {
        Ok(self.endpoints.header(id.into())?.remote_state)
    }

    /// 设置本地错误条件，随 close 帧发出。
    pub fn set_condition(&mut self, id: impl Into<EndpointId>, condition: ErrorCondition) -> Result<()> {
        self.endpoints.header_mut(id.into())?.local_condition = condition;
        Ok(())
    }

    pub fn condition(&self, id: impl Into<EndpointId>) -> Result<&ErrorCondition> {
        Ok(&self.endpoints.header(id.into())?.local_condition)
    }

    pub fn remote_condition(&self, id: impl Into<EndpointId>) -> Result<&ErrorCondition> {
        Ok(&self.endpoints.header(id.into())?.remote_condition)
    }

    /// 传输层记录对端携带的错误条件。
    pub fn set_remote_condition(
        &mut self,
        id: impl Into<EndpointId>,
        condition: ErrorCondition,
    ) -> Result<()> {
        self.endpoints.header_mut(id.into())?.remote_condition = condition;
        Ok(())
    }

    /// 传输层推进端点的远端状态。
    ///
    /// - **契约 (What)**：前进到 `ACTIVE` 投递 `*_REMOTE_OPEN`，前进到 `CLOSED` 投递
    ///   `*_REMOTE_CLOSE`；相同状态为无操作；回退被忽略并记录告警。
    pub fn set_remote_state(&mut self, id: impl Into<EndpointId>, state: EndpointState) -> Result<()> {
        let id = id.into();
        let header = self.endpoints.header_mut(id)?;
        let previous = header.remote_state;
        if previous == state {
            return Ok(());
        }
        if !previous.can_advance_to(state) {
            tracing::warn!(endpoint = %id, from = %previous, to = %state, "ignored backward remote transition");
            return Ok(());
        }
        header.remote_state = state;
        let event = match state {
            EndpointState::Active => id.remote_open_event(),
            EndpointState::Closed => id.remote_close_event(),
            EndpointState::Uninitialized => return Ok(()),
        };
        self.put_event(event, id.into());
        tracing::debug!(endpoint = %id, from = %previous, to = %state, "remote state advanced");
        Ok(())
    }

    /// 处理对端 open 帧。
    pub fn handle_remote_open(&mut self, open: RemoteOpen) -> Result<()> {
        self.remote = open;
        self.set_remote_state(EndpointId::Connection, EndpointState::Active)
    }

    // ---- 脏端点列表 ----

    /// 标记端点为脏。
    ///
    /// - **契约 (What)**：首次标记时追加到脏列表；`emit` 为真且已绑定传输时投递
    ///   `TRANSPORT` 并唤醒传输驱动。
    pub fn modified(&mut self, id: impl Into<EndpointId>, emit: bool) -> Result<()> {
        let id = id.into();
        let header = self.endpoints.header_mut(id)?;
        if !header.modified {
            header.modified = true;
            self.add_modified(id);
            tracing::trace!(endpoint = %id, "endpoint marked modified");
        }
        if emit {
            if let Some(transport) = self.transport.as_mut() {
                if let Some(collector) = self.collector.as_mut() {
                    collector.put(EventType::Transport, EventContext::Transport);
                }
                transport.notify_modified();
            }
        }
        Ok(())
    }

    /// 清除脏标记并移出脏列表。
    pub fn clear_modified(&mut self, id: impl Into<EndpointId>) -> Result<()> {
        let id = id.into();
        self.endpoints.header_mut(id)?.modified = false;
        self.remove_modified(id);
        Ok(())
    }

    /// 以端点自身的槽位拼入脏列表，O(1)；已在列表中时返回 `false`。
    pub(crate) fn add_modified(&mut self, id: EndpointId) -> bool {
        self.modified_list
            .push_back(&mut self.endpoints, id, Endpoints::modified_links)
    }

    /// 从脏列表摘除，O(1)；不在列表中时返回 `false`。
    pub(crate) fn remove_modified(&mut self, id: EndpointId) -> bool {
        self.modified_list
            .remove(&mut self.endpoints, id, Endpoints::modified_links)
    }

    pub fn is_modified(&self, id: impl Into<EndpointId>) -> Result<bool> {
        Ok(self.endpoints.header(id.into())?.modified)
    }

    pub fn modified_head(&self) -> Option<EndpointId> {
        self.modified_list.head()
    }

    /// 脏端点列表中 `id` 之后的端点；`id` 已被清除或回收时沿其保留的前向指针继续。
    pub fn modified_next(&self, id: impl Into<EndpointId>) -> Result<Option<EndpointId>> {
        let next = self.endpoints.retained_header(id.into())?.modified_links.next();
        Ok(first_linked(next, |e| {
            self.endpoints
                .retained_header(e)
                .ok()
                .map(|header| header.modified_links)
        }))
    }

    /// 将全部会话、链路与连接自身标记为脏（已释放者除外）。
    pub fn modify_endpoints(&mut self) -> Result<()> {
        let sessions = self.session_ids();
        for session in sessions {
            self.modify_session_endpoints(session)?;
        }
        if !self.endpoints.connection.freed {
            self.modified(EndpointId::Connection, true)?;
        }
        Ok(())
    }

    // ---- 引用计数与释放 ----

    pub fn refcount(&self, id: impl Into<EndpointId>) -> Result<usize> {
        Ok(self.endpoints.header(id.into())?.refcount)
    }

    pub fn is_freed(&self, id: impl Into<EndpointId>) -> Result<bool> {
        Ok(self.endpoints.header(id.into())?.freed)
    }

    pub fn incref(&mut self, id: impl Into<EndpointId>) -> Result<()> {
        self.endpoints.header_mut(id.into())?.refcount += 1;
        Ok(())
    }

    /// 归还一份引用；归零时终结端点。
    ///
    /// # Panics
    /// 计数已经为 0 时再次归还。
    pub fn decref(&mut self, id: impl Into<EndpointId>) -> Result<()> {
        let id = id.into();
        let header = self.endpoints.header_mut(id)?;
        let Some(remaining) = header.refcount.checked_sub(1) else {
            panic!("refcount underflow on {id}");
        };
        header.refcount = remaining;
        if remaining == 0 {
            self.finalize(id)?;
        }
        Ok(())
    }

    /// 释放端点：先运行变体的释放钩子，再归还所有者的引用。
    ///
    /// - **契约 (What)**：重复释放或作用于已回收句柄时静默成功。
    pub fn free(&mut self, id: impl Into<EndpointId>) -> Result<()> {
        let id = id.into();
        let Ok(header) = self.endpoints.header_mut(id) else {
            return Ok(());
        };
        if header.freed {
            return Ok(());
        }
        header.freed = true;
        tracing::debug!(endpoint = %id, "endpoint freed");
        match id {
            EndpointId::Connection => {
                for session in self.session_ids() {
                    self.free(session)?;
                }
            }
            EndpointId::Session(session) => self.free_session_children(session)?,
            EndpointId::Link(link) => self.free_link_children(link)?,
        }
        self.decref(id)
    }

    /// 终结钩子：投递 `*_FINAL`，回收槽位并归还对父端点的引用。
    ///
    /// - **契约 (What)**：每个端点至多终结一次；连接终结后引用计数再次归零时不再重复投递事件。
    fn finalize(&mut self, id: EndpointId) -> Result<()> {
        let header = self.endpoints.header_mut(id)?;
        if std::mem::replace(&mut header.finalized, true) {
            return Ok(());
        }
        self.put_event(id.final_event(), id.into());
        tracing::debug!(endpoint = %id, "endpoint finalized");
        match id {
            EndpointId::Connection => Ok(()),
            EndpointId::Session(session) => {
                self.clear_modified(id)?;
                self.session_order
                    .remove(&mut self.endpoints.sessions, session, Session::order_links);
                self.endpoints.sessions.retire(session.0);
                self.decref(EndpointId::Connection)
            }
            EndpointId::Link(link) => {
                self.clear_modified(id)?;
                self.detach_link(link)?;
                let session = self.link_ref(link)?.session;
                self.endpoints.links.retire(link.0);
                self.decref(EndpointId::Session(session))
            }
        }
    }

    // ---- 枚举 ----

    fn session_ids(&self) -> Vec<SessionId> {
        let mut ids = Vec::with_capacity(self.session_order.len());
        let mut cursor = self.session_order.head();
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self
                .endpoints
                .sessions
                .get(id.0)
                .and_then(|session| session.order.next());
        }
        ids
    }

    fn next_matching_session(
        &self,
        mut cursor: Option<SessionId>,
        local: StateFilter,
        remote: StateFilter,
    ) -> Option<SessionId> {
        let sessions = &self.endpoints.sessions;
        let order = |id: SessionId| sessions.get_or_retired(id.0).map(|session| session.order);
        while let Some(id) = first_linked(cursor, order) {
            let session = sessions.get(id.0)?;
            if session.header.matches(local, remote) {
                return Some(id);
            }
            cursor = session.order.next();
        }
        None
    }

    fn next_matching_link(
        &self,
        mut cursor: Option<LinkId>,
        local: StateFilter,
        remote: StateFilter,
    ) -> Option<LinkId> {
        let links = &self.endpoints.links;
        let order = |id: LinkId| links.get_or_retired(id.0).map(|link| link.order);
        while let Some(id) = first_linked(cursor, order) {
            let link = links.get(id.0)?;
            if link.header.matches(local, remote) {
                return Some(id);
            }
            cursor = link.order.next();
        }
        None
    }

    /// 会话集合中首个满足状态过滤的会话。
    pub fn session_head(&self, local: StateFilter, remote: StateFilter) -> Option<SessionId> {
        self.next_matching_session(self.session_order.head(), local, remote)
    }

    /// 从 `id` 之后继续查找满足过滤条件的会话。
    ///
    /// - **契约 (What)**：`id` 已被摘出会话集合、甚至已被回收时，仍可沿其保留的前向指针继续，
    ///   途中跳过此后被摘除的会话；回收后的槽位一旦复用，旧句柄返回 [`EngineError::UnknownSession`]。
    pub fn session_next(
        &self,
        id: SessionId,
        local: StateFilter,
        remote: StateFilter,
    ) -> Result<Option<SessionId>> {
        let next = self
            .endpoints
            .sessions
            .get_or_retired(id.0)
            .ok_or(EngineError::UnknownSession(id))?
            .order
            .next();
        Ok(self.next_matching_session(next, local, remote))
    }

    pub fn link_head(&self, local: StateFilter, remote: StateFilter) -> Option<LinkId> {
        self.next_matching_link(self.link_order.head(), local, remote)
    }

    pub fn link_next(
        &self,
        id: LinkId,
        local: StateFilter,
        remote: StateFilter,
    ) -> Result<Option<LinkId>> {
        let next = self
            .endpoints
            .links
            .get_or_retired(id.0)
            .ok_or(EngineError::UnknownLink(id))?
            .order
            .next();
        Ok(self.next_matching_link(next, local, remote))
    }

    pub fn session_count(&self) -> usize {
        self.session_order.len()
    }

    pub fn link_count(&self) -> usize {
        self.link_order.len()
    }

    // ---- 收集器与传输绑定 ----

    /// 绑定收集器并返回此前绑定的收集器。
    ///
    /// - **契约 (What)**：投递 `CONNECTION_INIT`，并按集合顺序为现存会话补发 `SESSION_INIT`、
    ///   为现存链路补发 `LINK_INIT`。
    pub fn collect(&mut self, collector: Collector) -> Option<Collector> {
        let previous = self.collector.replace(collector);
        self.put_event(EventType::ConnectionInit, EventContext::Connection);
        for session in self.session_ids() {
            self.put_event(EventType::SessionInit, EventContext::Session(session));
        }
        let mut cursor = self.link_order.head();
        while let Some(link) = cursor {
            self.put_event(EventType::LinkInit, EventContext::Link(link));
            cursor = self
                .endpoints
                .links
                .get(link.0)
                .and_then(|entry| entry.order.next());
        }
        tracing::debug!(rebound = previous.is_some(), "collector bound");
        previous
    }

    /// 解除收集器绑定。
    pub fn take_collector(&mut self) -> Option<Collector> {
        self.collector.take()
    }

    pub fn collector(&self) -> Option<&Collector> {
        self.collector.as_ref()
    }

    pub fn collector_mut(&mut self) -> Option<&mut Collector> {
        self.collector.as_mut()
    }

    /// 绑定传输驱动，返回此前绑定的驱动。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：已有驱动时先按解绑流程处理；随后投递 `CONNECTION_BOUND`，
    ///   驱动持有连接一份引用，并把全部端点标记为脏，使驱动在首轮输出中看到完整状态。
    pub fn bind_transport(&mut self, transport: Box<dyn Transport>) -> Result<Option<Box<dyn Transport>>> {
        let previous = self.unbind_transport()?;
        self.put_event(EventType::ConnectionBound, EventContext::Connection);
        self.transport = Some(transport);
        self.endpoints.connection.refcount += 1;
        tracing::debug!("transport bound");
        self.modify_endpoints()?;
        Ok(previous)
    }

    /// 解绑传输驱动并归还其持有的引用。
    pub fn unbind_transport(&mut self) -> Result<Option<Box<dyn Transport>>> {
        let Some(transport) = self.transport.take() else {
            return Ok(None);
        };
        self.put_event(EventType::ConnectionUnbound, EventContext::Connection);
        tracing::debug!("transport unbound");
        self.decref(EndpointId::Connection)?;
        Ok(Some(transport))
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }
}
