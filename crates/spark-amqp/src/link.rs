//! # link：发送端与接收端链路
//!
//! ## 核心意图（Why）
//! - 链路维护本链路上尚未结算的投递链，`current` 指向下一条待应用处理的投递；
//! - 信用（credit）由接收方授予，发送方在 `current` 可写时才进入工作列表。
//!
//! ## 契约（What）
//! - 链路创建时持有所属会话一份引用，终结时归还；
//! - 每条投递持有链路一份引用，因此链路要等到名下投递全部回收后才会终结；
//! - [`Connection::advance`] 的语义依角色不同，见方法文档。

use core::fmt;

use crate::{
    Connection,
    arena::{Arena, define_handle},
    delivery::{Delivery, DeliveryId},
    endpoint::{EndpointHeader, impl_endpoint_via_header},
    error::{EngineError, Result},
    event::{EventContext, EventType},
    list::{List, ListLinks},
    session::SessionId,
};

define_handle!(
    /// 链路句柄，仅在签发它的连接内有效。
    LinkId,
    "link"
);

/// 链路角色。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        })
    }
}

/// 链路端点的只读视图。
#[derive(Debug)]
pub struct Link {
    pub(crate) header: EndpointHeader,
    pub(crate) order: ListLinks<LinkId>,
    pub(crate) session: SessionId,
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) credit: i32,
    pub(crate) queued: usize,
    pub(crate) unsettled: usize,
    pub(crate) current: Option<DeliveryId>,
    pub(crate) chain: List<DeliveryId>,
}

impl_endpoint_via_header!(Link);

impl Link {
    pub(crate) fn new(session: SessionId, name: String, role: Role) -> Self {
        Self {
            header: EndpointHeader::new(),
            order: ListLinks::default(),
            session,
            name,
            role,
            credit: 0,
            queued: 0,
            unsettled: 0,
            current: None,
            chain: List::default(),
        }
    }

    pub(crate) fn order_links(links: &mut Arena<Link>, id: LinkId) -> Option<&mut ListLinks<LinkId>> {
        links.get_mut(id.0).map(|link| &mut link.order)
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_sender(&self) -> bool {
        self.role == Role::Sender
    }

    pub fn is_receiver(&self) -> bool {
        self.role == Role::Receiver
    }

    /// 剩余信用，可能因超额推进而为负。
    pub fn credit(&self) -> i32 {
        self.credit
    }

    /// 已就绪但尚未被对端消费的投递数。
    pub fn queued(&self) -> usize {
        self.queued
    }

    pub fn unsettled(&self) -> usize {
        self.unsettled
    }

    pub fn current(&self) -> Option<DeliveryId> {
        self.current
    }

    /// 投递链中最早的未结算投递。
    pub fn head(&self) -> Option<DeliveryId> {
        self.chain.head()
    }
}

impl Connection {
    /// 链路只读视图。
    pub fn link_ref(&self, id: LinkId) -> Result<&Link> {
        self.endpoints
            .links
            .get(id.0)
            .ok_or(EngineError::UnknownLink(id))
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> Result<&mut Link> {
        self.endpoints
            .links
            .get_mut(id.0)
            .ok_or(EngineError::UnknownLink(id))
    }

    pub(crate) fn expect_role(&self, id: LinkId, expected: Role) -> Result<&Link> {
        let link = self.link_ref(id)?;
        if link.role != expected {
            return Err(EngineError::RoleMismatch { link: id, expected });
        }
        Ok(link)
    }

    pub fn current(&self, link: LinkId) -> Result<Option<DeliveryId>> {
        Ok(self.link_ref(link)?.current)
    }

    /// 链路上未结算投递的数量。
    pub fn unsettled(&self, link: LinkId) -> Result<usize> {
        Ok(self.link_ref(link)?.unsettled)
    }

    /// 对端通过 flow 帧为发送端设置信用。
    ///
    /// - **契约 (What)**：覆盖原有信用值，投递 `LINK_FLOW`，并重算 `current` 的工作列表成员资格。
    pub fn set_credit(&mut self, link: LinkId, credit: i32) -> Result<()> {
        let current = {
            let entry = self.link_mut(link)?;
            if entry.role != Role::Sender {
                return Err(EngineError::RoleMismatch {
                    link,
                    expected: Role::Sender,
                });
            }
            entry.credit = credit;
            entry.current
        };
        tracing::trace!(%link, credit, "sender credit updated");
        self.put_event(EventType::LinkFlow, EventContext::Link(link));
        if let Some(current) = current {
            self.work_update(current)?;
        }
        Ok(())
    }

    /// 接收端授予对端额外信用，链路被标记为脏以便传输层发出 flow 帧。
    pub fn flow(&mut self, link: LinkId, credit: u32) -> Result<()> {
        {
            let entry = self.link_mut(link)?;
            if entry.role != Role::Receiver {
                return Err(EngineError::RoleMismatch {
                    link,
                    expected: Role::Receiver,
                });
            }
            entry.credit = entry
                .credit
                .saturating_add(i32::try_from(credit).unwrap_or(i32::MAX));
        }
        tracing::trace!(%link, credit, "receiver granted credit");
        self.modified(link, true)
    }

    /// 推进 `current` 到投递链中的下一条投递。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：`current` 为空时返回 `Ok(false)` 且无副作用；否则返回 `Ok(true)`。
    ///   - 发送端：旧 `current` 标记为完整，消耗一份信用，`queued` 与会话的待发投递数加一，
    ///     旧 `current` 加入传输工作列表；
    ///   - 接收端：旧 `current` 标记为已处理，消耗一份信用，`queued` 减一，
    ///     其剩余未读字节从会话接收字节数中扣除；
    /// - **执行 (How)**：新旧两条投递都重新计算工作列表成员资格。
    pub fn advance(&mut self, link: LinkId) -> Result<bool> {
        let (role, session, previous) = {
            let entry = self.link_ref(link)?;
            match entry.current {
                Some(current) => (entry.role, entry.session, current),
                None => return Ok(false),
            }
        };
        let next = self.delivery_ref(previous)?.chain.next();
        {
            let entry = self.link_mut(link)?;
            entry.current = next;
            entry.credit = entry.credit.saturating_sub(1);
            match role {
                Role::Sender => entry.queued += 1,
                Role::Receiver => entry.queued = entry.queued.saturating_sub(1),
            }
        }

        match role {
            Role::Sender => {
                {
                    let delivery = self.delivery_mut(previous)?;
                    delivery.complete = true;
                    delivery.counted = true;
                }
                self.session_mut(session)?.outgoing_deliveries += 1;
                self.add_transport_work(previous)?;
            }
            Role::Receiver => {
                let (pending, counted) = {
                    let delivery = self.delivery_mut(previous)?;
                    delivery.done = true;
                    (delivery.pending(), delivery.take_count())
                };
                let session_entry = self.session_mut(session)?;
                session_entry.incoming_bytes = session_entry.incoming_bytes.saturating_sub(pending);
                if counted {
                    session_entry.incoming_deliveries =
                        session_entry.incoming_deliveries.saturating_sub(1);
                }
            }
        }
        tracing::trace!(%link, delivery = %previous, %role, "link advanced");

        self.work_update(previous)?;
        if let Some(next) = next {
            self.work_update(next)?;
        }
        Ok(true)
    }

    /// 从会话注册表、滞留集合与连接链路集合中摘除链路。
    pub(crate) fn detach_link(&mut self, id: LinkId) -> Result<()> {
        let (session, role, name) = {
            let link = self.link_ref(id)?;
            (link.session, link.role, link.name.clone())
        };
        if let Ok(session_entry) = self.session_mut(session) {
            let registry = session_entry.registry_mut(role);
            if registry.get(&name) == Some(&id) {
                registry.remove(&name);
            }
            session_entry.lingering.retain(|link| *link != id);
        }
        self.link_order
            .remove(&mut self.endpoints.links, id, Link::order_links);
        Ok(())
    }

    /// 链路释放钩子：摘除链路，并结算投递链上的全部投递。
    pub(crate) fn free_link_children(&mut self, id: LinkId) -> Result<()> {
        self.detach_link(id)?;

        let mut chain = Vec::new();
        let mut cursor = self.link_ref(id)?.chain.head();
        while let Some(delivery) = cursor {
            chain.push(delivery);
            cursor = self.deliveries.get(delivery.0).and_then(Delivery::chain_next);
        }
        for delivery in chain {
            self.settle(delivery)?;
        }
        Ok(())
    }
}
