//! # delivery：投递、处置状态与字节缓冲
//!
//! ## 核心意图（Why）
//! - 一条投递对应链路上的一次消息传输，承载本地/远端处置、结算标记与待收发字节；
//! - 结算后投递从链路的投递链摘除；只有当它同时不在传输工作列表中时才真正回收槽位，
//!   保证传输层仍能看到“需要发出 settle”的投递。
//!
//! ## 契约（What）
//! - [`Connection::settle`] 与 [`Connection::free_delivery`] 幂等，作用于已回收句柄时静默成功；
//! - 已回收句柄的 [`Connection::is_settled`] 返回 `true`，其余查询返回
//!   [`EngineError::UnknownDelivery`]；
//! - 回收后的投递在槽位复用前仍保留链表指针，停在其上的遍历（工作列表、传输工作列表、
//!   投递链）可以继续前进；
//! - 所有可能改变工作列表成员资格的修改都在返回前调用 `work_update`。

use bytes::{Bytes, BytesMut};

use crate::{
    Connection,
    arena::{Arena, define_handle},
    codec::{Codec, CodecError},
    endpoint::{EndpointId, ErrorCondition},
    error::{EngineError, Result},
    event::{EventContext, EventType},
    link::{LinkId, Role},
    list::{ListLinks, first_linked},
};

define_handle!(
    /// 投递句柄，仅在签发它的连接内有效。
    DeliveryId,
    "delivery"
);

/// 缺省消息格式。
pub const DEFAULT_MESSAGE_FORMAT: u32 = 0;

/// 投递处置状态（AMQP outcome 与 delivery-state 的投影）。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeliveryState {
    Accepted,
    Rejected(Option<ErrorCondition>),
    Released,
    Modified {
        delivery_failed: bool,
        undeliverable_here: bool,
    },
    /// 非终态：接收方已收到的段位置。
    Received {
        section_number: u32,
        section_offset: u64,
    },
}

impl DeliveryState {
    /// 是否为终态处置。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryState::Received { .. })
    }
}

/// [`Connection::recv`] 的结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recv {
    /// 本次复制的字节数，可能为 0（暂无数据但投递尚未完整）。
    Data(usize),
    /// 投递已完整且没有剩余字节。
    EndOfStream,
}

/// 投递的只读视图。
#[derive(Debug)]
pub struct Delivery {
    pub(crate) tag: Bytes,
    pub(crate) link: LinkId,
    pub(crate) local_state: Option<DeliveryState>,
    pub(crate) remote_state: Option<DeliveryState>,
    pub(crate) default_state: Option<DeliveryState>,
    pub(crate) settled: bool,
    pub(crate) remote_settled: bool,
    pub(crate) updated: bool,
    pub(crate) complete: bool,
    pub(crate) done: bool,
    pub(crate) counted: bool,
    pub(crate) message_format: u32,
    pub(crate) buffer: BytesMut,
    pub(crate) allocated: usize,
    pub(crate) offset: usize,
    pub(crate) chain: ListLinks<DeliveryId>,
    pub(crate) work: ListLinks<DeliveryId>,
    pub(crate) transport_work: ListLinks<DeliveryId>,
}

impl Delivery {
    fn new(link: LinkId, tag: Bytes) -> Self {
        Self {
            tag,
            link,
            local_state: None,
            remote_state: None,
            default_state: None,
            settled: false,
            remote_settled: false,
            updated: false,
            complete: false,
            done: false,
            counted: false,
            message_format: DEFAULT_MESSAGE_FORMAT,
            buffer: BytesMut::new(),
            allocated: 0,
            offset: 0,
            chain: ListLinks::default(),
            work: ListLinks::default(),
            transport_work: ListLinks::default(),
        }
    }

    pub(crate) fn chain_links(
        deliveries: &mut Arena<Delivery>,
        id: DeliveryId,
    ) -> Option<&mut ListLinks<DeliveryId>> {
        deliveries.get_mut(id.0).map(|d| &mut d.chain)
    }

    pub(crate) fn work_links(
        deliveries: &mut Arena<Delivery>,
        id: DeliveryId,
    ) -> Option<&mut ListLinks<DeliveryId>> {
        deliveries.get_mut(id.0).map(|d| &mut d.work)
    }

    pub(crate) fn transport_work_links(
        deliveries: &mut Arena<Delivery>,
        id: DeliveryId,
    ) -> Option<&mut ListLinks<DeliveryId>> {
        deliveries.get_mut(id.0).map(|d| &mut d.transport_work)
    }

    pub(crate) fn chain_next(&self) -> Option<DeliveryId> {
        self.chain.next()
    }

    /// 取出并清除会话计数标记。
    pub(crate) fn take_count(&mut self) -> bool {
        std::mem::take(&mut self.counted)
    }

    /// 追加字节。
    ///
    /// - **逻辑 (How)**：尾部空闲空间不足时重新分配，新容量取
    ///   `max(旧容量 + 未读字节, 未读字节 + 新增字节)`，未读字节压缩到偏移 0。
    fn append(&mut self, bytes: &[u8]) {
        let pending = self.buffer.len();
        let free_tail = self.allocated - self.offset - pending;
        if free_tail < bytes.len() {
            let capacity = (self.allocated + pending).max(pending + bytes.len());
            let mut grown = BytesMut::with_capacity(capacity);
            grown.extend_from_slice(&self.buffer);
            self.buffer = grown;
            self.allocated = capacity;
            self.offset = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// 消费前端 `count` 个字节。
    fn consume(&mut self, count: usize) -> Bytes {
        self.offset += count;
        self.buffer.split_to(count).freeze()
    }

    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn local_state(&self) -> Option<&DeliveryState> {
        self.local_state.as_ref()
    }

    pub fn remote_state(&self) -> Option<&DeliveryState> {
        self.remote_state.as_ref()
    }

    pub fn default_state(&self) -> Option<&DeliveryState> {
        self.default_state.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn remotely_settled(&self) -> bool {
        self.remote_settled
    }

    /// 远端处置或远端结算自上次 `clear` 以来是否变化。
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_partial(&self) -> bool {
        !self.complete
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn message_format(&self) -> u32 {
        self.message_format
    }

    /// 未读字节数。
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// 当前缓冲容量。
    pub fn capacity(&self) -> usize {
        self.allocated
    }

    /// 是否位于应用工作列表中。
    pub fn is_work(&self) -> bool {
        self.work.is_linked()
    }

    /// 是否位于传输工作列表中。
    pub fn is_transport_work(&self) -> bool {
        self.transport_work.is_linked()
    }

    /// 未读字节的只读视图。
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

impl Connection {
    /// 在链路上创建投递。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 投递追加到链路投递链末尾；链路 `current` 为空时指向新投递；
    ///   - 链路未结算计数加一，投递持有链路一份引用；接收端链路的 `queued` 加一；
    ///   - 返回前按工作列表规则重算成员资格。
    pub fn delivery(&mut self, link: LinkId, tag: impl Into<Bytes>) -> Result<DeliveryId> {
        let tag = tag.into();
        let links = &mut self.endpoints.links;
        let entry = links.get_mut(link.0).ok_or(EngineError::UnknownLink(link))?;
        let id = DeliveryId(self.deliveries.insert(Delivery::new(link, tag.clone())));
        entry
            .chain
            .push_back(&mut self.deliveries, id, Delivery::chain_links);
        if entry.current.is_none() {
            entry.current = Some(id);
        }
        entry.unsettled += 1;
        if entry.role == Role::Receiver {
            entry.queued += 1;
        }
        entry.header.refcount += 1;
        tracing::trace!(
            %link,
            delivery = %id,
            tag = %hex::encode(&tag),
            "delivery created"
        );
        self.work_update(id)?;
        Ok(id)
    }

    /// 投递只读视图。
    pub fn delivery_ref(&self, id: DeliveryId) -> Result<&Delivery> {
        self.deliveries
            .get(id.0)
            .ok_or(EngineError::UnknownDelivery(id))
    }

    pub(crate) fn delivery_mut(&mut self, id: DeliveryId) -> Result<&mut Delivery> {
        self.deliveries
            .get_mut(id.0)
            .ok_or(EngineError::UnknownDelivery(id))
    }

    /// 设置本地处置；对端尚未结算时加入传输工作列表。
    pub fn disposition(&mut self, id: DeliveryId, state: DeliveryState) -> Result<()> {
        let remote_settled = {
            let delivery = self.delivery_mut(id)?;
            delivery.local_state = Some(state);
            delivery.remote_settled
        };
        if !remote_settled {
            self.add_transport_work(id)?;
        }
        self.work_update(id)
    }

    /// 本地结算。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 重复调用或作用于已回收句柄时静默成功；
    ///   - 链路未结算计数减一；对端已结算时通知传输层，否则加入传输工作列表；
    ///   - 投递若为链路 `current`，`current` 前移到投递链下一项；随后从投递链摘除；
    /// - **执行 (How)**：结算后若投递不在传输工作列表中，立即回收槽位并归还链路引用。
    pub fn settle(&mut self, id: DeliveryId) -> Result<()> {
        let Some(delivery) = self.deliveries.get_mut(id.0) else {
            return Ok(());
        };
        if delivery.settled {
            return Ok(());
        }
        delivery.settled = true;
        let link_id = delivery.link;
        let remote_settled = delivery.remote_settled;
        let next = delivery.chain.next();

        let link = self
            .endpoints
            .links
            .get_mut(link_id.0)
            .ok_or(EngineError::UnknownLink(link_id))?;
        link.unsettled = link.unsettled.saturating_sub(1);
        let advanced = link.current == Some(id);
        if advanced {
            link.current = next;
        }
        link.chain
            .remove(&mut self.deliveries, id, Delivery::chain_links);

        if remote_settled {
            if let Some(transport) = self.transport.as_mut() {
                transport.delivery_settled(id);
            }
        } else {
            self.add_transport_work(id)?;
        }
        tracing::debug!(delivery = %id, link = %link_id, remote_settled, "delivery settled");

        self.work_update(id)?;
        if advanced {
            if let Some(next) = next {
                self.work_update(next)?;
            }
        }
        self.reap_delivery(id)
    }

    /// 释放投递，等价于 [`Connection::settle`]。
    pub fn free_delivery(&mut self, id: DeliveryId) -> Result<()> {
        self.settle(id)
    }

    /// 已结算且不在传输工作列表中的投递回收槽位，并归还链路引用。
    pub(crate) fn reap_delivery(&mut self, id: DeliveryId) -> Result<()> {
        let reapable = match self.deliveries.get(id.0) {
            Some(delivery) => delivery.settled && !delivery.transport_work.is_linked(),
            None => false,
        };
        if !reapable {
            return Ok(());
        }
        self.work
            .remove(&mut self.deliveries, id, Delivery::work_links);
        if let Some(delivery) = self.deliveries.get_mut(id.0) {
            delivery.buffer = BytesMut::new();
            delivery.allocated = 0;
            delivery.offset = 0;
        }
        let Some(link) = self.deliveries.retire(id.0).map(Delivery::link) else {
            return Ok(());
        };
        tracing::trace!(delivery = %id, "delivery reaped");
        self.decref(EndpointId::Link(link))
    }

    /// 写入待发送字节。
    ///
    /// - **契约 (What)**：返回写入的字节数，投递加入传输工作列表；新字节计入所属会话的
    ///   待发字节数（发送端）或待读字节数（接收端）。
    pub fn send(&mut self, id: DeliveryId, bytes: &[u8]) -> Result<usize> {
        let link = self.delivery_ref(id)?.link;
        let (role, session) = {
            let entry = self.link_ref(link)?;
            (entry.role, entry.session)
        };
        self.delivery_mut(id)?.append(bytes);
        self.add_transport_work(id)?;
        let session_entry = self.session_mut(session)?;
        match role {
            Role::Sender => session_entry.outgoing_bytes += bytes.len(),
            Role::Receiver => session_entry.incoming_bytes += bytes.len(),
        }
        tracing::trace!(delivery = %id, len = bytes.len(), "bytes buffered for send");
        Ok(bytes.len())
    }

    /// 读取已缓冲的字节。
    ///
    /// - **契约 (What)**：复制 `min(buf.len(), pending)` 个字节；没有读到任何字节且投递已完整时返回
    ///   [`Recv::EndOfStream`]。读走的字节从所属会话的待读字节数（接收端）或待发字节数（发送端）中扣除。
    pub fn recv(&mut self, id: DeliveryId, buf: &mut [u8]) -> Result<Recv> {
        let link = self.delivery_ref(id)?.link;
        let (role, session) = {
            let entry = self.link_ref(link)?;
            (entry.role, entry.session)
        };
        let delivery = self.delivery_mut(id)?;
        let count = buf.len().min(delivery.pending());
        let complete = delivery.complete;
        if count > 0 {
            let chunk = delivery.consume(count);
            buf[..count].copy_from_slice(&chunk);
            let session_entry = self.session_mut(session)?;
            let counter = match role {
                Role::Sender => &mut session_entry.outgoing_bytes,
                Role::Receiver => &mut session_entry.incoming_bytes,
            };
            *counter = counter.saturating_sub(count);
        }
        if count == 0 && complete {
            return Ok(Recv::EndOfStream);
        }
        Ok(Recv::Data(count))
    }

    /// 传输层交付接收端投递的字节。
    ///
    /// - **契约 (What)**：会话接收字节数增加；投递首次收到字节时计入会话的接收投递数。
    pub fn push_incoming(&mut self, id: DeliveryId, bytes: &[u8]) -> Result<()> {
        let link = self.delivery_ref(id)?.link;
        let session = self.expect_role(link, Role::Receiver)?.session;
        let first = {
            let delivery = self.delivery_mut(id)?;
            delivery.append(bytes);
            !std::mem::replace(&mut delivery.counted, true)
        };
        let session_entry = self.session_mut(session)?;
        session_entry.incoming_bytes += bytes.len();
        if first {
            session_entry.incoming_deliveries += 1;
        }
        tracing::trace!(delivery = %id, len = bytes.len(), "incoming bytes buffered");
        Ok(())
    }

    /// 传输层取走发送端投递至多 `max` 个待发字节。
    pub fn drain_outgoing(&mut self, id: DeliveryId, max: usize) -> Result<Bytes> {
        let link = self.delivery_ref(id)?.link;
        let session = self.expect_role(link, Role::Sender)?.session;
        let chunk = {
            let delivery = self.delivery_mut(id)?;
            let count = max.min(delivery.pending());
            delivery.consume(count)
        };
        let session_entry = self.session_mut(session)?;
        session_entry.outgoing_bytes = session_entry.outgoing_bytes.saturating_sub(chunk.len());
        Ok(chunk)
    }

    /// 以编解码器编码 `value` 并写入发送端投递。
    pub fn send_encoded<C: Codec>(
        &mut self,
        id: DeliveryId,
        codec: &C,
        value: &C::Outgoing,
    ) -> Result<usize> {
        let mut encoded = BytesMut::new();
        codec.encode(value, &mut encoded)?;
        self.send(id, &encoded)
    }

    /// 从接收端投递解码一条值。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 成功时按实际消费的字节推进读取位置，返回 `Ok(Some(value))`；
    ///   - 没有未读字节，或字节不足而投递尚未完整时返回 `Ok(None)`，不消费任何字节；
    ///   - 投递已完整但字节仍不足、或字节非法时返回 [`EngineError::Codec`]，不消费任何字节。
    /// - **执行 (How)**：在未读字节的副本上解码，成功后才推进缓冲。
    pub fn recv_decoded<C: Codec>(&mut self, id: DeliveryId, codec: &C) -> Result<Option<C::Incoming>> {
        let link = self.delivery_ref(id)?.link;
        let session = self.expect_role(link, Role::Receiver)?.session;
        let (mut window, complete) = {
            let delivery = self.delivery_ref(id)?;
            (Bytes::copy_from_slice(delivery.bytes()), delivery.complete)
        };
        if window.is_empty() {
            return Ok(None);
        }
        let before = window.len();
        let value = match codec.decode(&mut window) {
            Ok(value) => value,
            Err(CodecError::Truncated { .. }) if !complete => return Ok(None),
            Err(err) => {
                tracing::warn!(delivery = %id, error = %err, "delivery payload failed to decode");
                return Err(err.into());
            }
        };
        let consumed = before - window.len();
        let delivery = self.delivery_mut(id)?;
        delivery.consume(consumed);
        let session_entry = self.session_mut(session)?;
        session_entry.incoming_bytes = session_entry.incoming_bytes.saturating_sub(consumed);
        Ok(Some(value))
    }

    /// 标记投递内容已完整。
    pub fn set_complete(&mut self, id: DeliveryId) -> Result<()> {
        self.delivery_mut(id)?.complete = true;
        Ok(())
    }

    /// 标记投递已处理完毕；已推进的发送端投递同时从会话待发投递数中扣除。
    pub fn set_done(&mut self, id: DeliveryId) -> Result<()> {
        let (link, counted) = {
            let delivery = self.delivery_mut(id)?;
            delivery.done = true;
            (delivery.link, delivery.take_count())
        };
        let (role, session) = {
            let entry = self.link_ref(link)?;
            (entry.role, entry.session)
        };
        if counted {
            let session_entry = self.session_mut(session)?;
            match role {
                Role::Sender => {
                    session_entry.outgoing_deliveries =
                        session_entry.outgoing_deliveries.saturating_sub(1)
                }
                Role::Receiver => {
                    session_entry.incoming_deliveries =
                        session_entry.incoming_deliveries.saturating_sub(1)
                }
            }
        }
        Ok(())
    }

    pub fn set_message_format(&mut self, id: DeliveryId, format: u32) -> Result<()> {
        self.delivery_mut(id)?.message_format = format;
        Ok(())
    }

    pub fn set_default_state(&mut self, id: DeliveryId, state: Option<DeliveryState>) -> Result<()> {
        self.delivery_mut(id)?.default_state = state;
        Ok(())
    }

    pub fn default_state(&self, id: DeliveryId) -> Result<Option<&DeliveryState>> {
        Ok(self.delivery_ref(id)?.default_state.as_ref())
    }

    /// 传输层记录远端处置。
    pub fn set_remote_disposition(&mut self, id: DeliveryId, state: DeliveryState) -> Result<()> {
        {
            let delivery = self.delivery_mut(id)?;
            delivery.remote_state = Some(state);
            delivery.updated = true;
        }
        self.put_event(EventType::Delivery, EventContext::Delivery(id));
        self.work_update(id)
    }

    /// 传输层记录远端结算。
    pub fn set_remote_settled(&mut self, id: DeliveryId, settled: bool) -> Result<()> {
        {
            let delivery = self.delivery_mut(id)?;
            delivery.remote_settled = settled;
            delivery.updated = true;
        }
        self.put_event(EventType::Delivery, EventContext::Delivery(id));
        self.work_update(id)
    }

    /// 清除 `updated` 标记并重算工作列表成员资格。
    pub fn clear(&mut self, id: DeliveryId) -> Result<()> {
        self.delivery_mut(id)?.updated = false;
        self.work_update(id)
    }

    /// 接收端链路上 `id` 为 `current` 时可读。
    pub fn is_readable(&self, id: DeliveryId) -> Result<bool> {
        let delivery = self.delivery_ref(id)?;
        Ok(self.readable(id, delivery))
    }

    /// 发送端链路上 `id` 为 `current` 且链路有信用时可写。
    pub fn is_writable(&self, id: DeliveryId) -> Result<bool> {
        let delivery = self.delivery_ref(id)?;
        Ok(self.writable(id, delivery))
    }

    /// 已回收的投递视为已结算。
    pub fn is_settled(&self, id: DeliveryId) -> bool {
        self.deliveries.get(id.0).is_none_or(Delivery::is_settled)
    }

    /// 发送端投递是否仍有未交给传输层的内容。
    pub fn is_buffered(&self, id: DeliveryId) -> Result<bool> {
        let delivery = self.delivery_ref(id)?;
        if delivery.remote_settled {
            return Ok(false);
        }
        if self.link_ref(delivery.link)?.role != Role::Sender {
            return Ok(false);
        }
        Ok(!delivery.done && (delivery.complete || delivery.pending() > 0))
    }

    pub fn is_partial(&self, id: DeliveryId) -> Result<bool> {
        Ok(self.delivery_ref(id)?.is_partial())
    }

    pub fn pending(&self, id: DeliveryId) -> Result<usize> {
        Ok(self.delivery_ref(id)?.pending())
    }

    /// 链路投递链上的下一条投递；`id` 已结算摘链时沿其保留的前向指针继续。
    pub fn delivery_next(&self, id: DeliveryId) -> Result<Option<DeliveryId>> {
        let next = self.delivery_entry(id)?.chain_next();
        Ok(first_linked(next, |d| self.deliveries.get_or_retired(d.0).map(|e| e.chain)))
    }

    /// 存活投递，或回收后槽位尚未复用的投递；供遍历从已回收句柄继续前进。
    pub(crate) fn delivery_entry(&self, id: DeliveryId) -> Result<&Delivery> {
        self.deliveries
            .get_or_retired(id.0)
            .ok_or(EngineError::UnknownDelivery(id))
    }

    pub(crate) fn readable(&self, id: DeliveryId, delivery: &Delivery) -> bool {
        self.endpoints
            .links
            .get(delivery.link.0)
            .is_some_and(|link| link.role == Role::Receiver && link.current == Some(id))
    }

    pub(crate) fn writable(&self, id: DeliveryId, delivery: &Delivery) -> bool {
        self.endpoints.links.get(delivery.link.0).is_some_and(|link| {
            link.role == Role::Sender && link.current == Some(id) && link.credit > 0
        })
    }
}
