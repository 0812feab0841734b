//! # work：应用工作列表与传输工作列表
//!
//! ## 核心意图（Why）
//! - 嵌入方每轮驱动只需遍历两条列表即可得知“哪些投递需要处理”，无需扫描全部链路；
//! - 应用工作列表的成员资格由单一规则决定：
//!   `!settled && (readable || writable || updated)`；
//! - 传输工作列表记录需要编码发出（处置、结算或数据）的投递，由传输层显式移除。
//!
//! ## 契约（What）
//! - 插入与移除均为 O(1) 且幂等；两条列表都按插入顺序遍历；
//! - 移出传输工作列表的已结算投递在此刻被回收。

use crate::{
    Connection,
    delivery::{Delivery, DeliveryId},
    endpoint::EndpointId,
    error::{EngineError, Result},
    list::first_linked,
};

impl Connection {
    /// 依据工作列表规则重算投递的成员资格；句柄已回收时无操作。
    pub(crate) fn work_update(&mut self, id: DeliveryId) -> Result<()> {
        let Some(delivery) = self.deliveries.get(id.0) else {
            return Ok(());
        };
        let belongs = !delivery.settled
            && (self.readable(id, delivery) || self.writable(id, delivery) || delivery.updated);
        if belongs {
            if self
                .work
                .push_back(&mut self.deliveries, id, Delivery::work_links)
            {
                tracing::trace!(delivery = %id, "added to work list");
            }
        } else if self
            .work
            .remove(&mut self.deliveries, id, Delivery::work_links)
        {
            tracing::trace!(delivery = %id, "removed from work list");
        }
        Ok(())
    }

    /// 应用工作列表的首个投递。
    pub fn work_head(&self) -> Option<DeliveryId> {
        self.work.head()
    }

    /// 应用工作列表中 `id` 之后的投递。
    ///
    /// - **契约 (What)**：`id` 已离开工作列表（例如刚被结算并回收）时，沿其离开时保留的前向指针
    ///   返回首个仍在列表中的投递，典型的“处理、结算、取下一个”排空循环因此不会中断。
    pub fn work_next(&self, id: DeliveryId) -> Result<Option<DeliveryId>> {
        let next = self.delivery_entry(id)?.work.next();
        Ok(first_linked(next, |d| self.deliveries.get_or_retired(d.0).map(|e| e.work)))
    }

    /// 按顺序遍历应用工作列表。
    pub fn work_sequence(&self) -> WorkSequence<'_> {
        WorkSequence {
            connection: self,
            next: self.work.head(),
        }
    }

    pub fn work_len(&self) -> usize {
        self.work.len()
    }

    /// 加入传输工作列表。
    ///
    /// - **契约 (What)**：无论投递是否已在列表中，连接都会先被标记为脏；
    ///   新加入时 [`Connection::transport_work_size`] 加一。
    pub fn add_transport_work(&mut self, id: DeliveryId) -> Result<()> {
        if !self.deliveries.contains(id.0) {
            return Err(EngineError::UnknownDelivery(id));
        }
        self.modified(EndpointId::Connection, true)?;
        if self
            .transport_work
            .push_back(&mut self.deliveries, id, Delivery::transport_work_links)
        {
            tracing::trace!(delivery = %id, size = self.transport_work.len(), "added to transport work");
        }
        Ok(())
    }

    /// 移出传输工作列表；已结算的投递随即回收。作用于已回收句柄时静默成功。
    pub fn remove_transport_work(&mut self, id: DeliveryId) -> Result<()> {
        if self
            .transport_work
            .remove(&mut self.deliveries, id, Delivery::transport_work_links)
        {
            tracing::trace!(delivery = %id, size = self.transport_work.len(), "removed from transport work");
        }
        self.reap_delivery(id)
    }

    pub fn transport_work_head(&self) -> Option<DeliveryId> {
        self.transport_work.head()
    }

    /// 传输工作列表中 `id` 之后的投递；`id` 已被移出或回收时同 [`Connection::work_next`]。
    pub fn transport_work_next(&self, id: DeliveryId) -> Result<Option<DeliveryId>> {
        let next = self.delivery_entry(id)?.transport_work.next();
        Ok(first_linked(next, |d| {
            self.deliveries
                .get_or_retired(d.0)
                .map(|e| e.transport_work)
        }))
    }

    /// 传输工作列表中的投递数。
    pub fn transport_work_size(&self) -> usize {
        self.transport_work.len()
    }
}

/// 应用工作列表迭代器，见 [`Connection::work_sequence`]。
#[derive(Debug)]
pub struct WorkSequence<'a> {
    connection: &'a Connection,
    next: Option<DeliveryId>,
}

impl Iterator for WorkSequence<'_> {
    type Item = DeliveryId;

    fn next(&mut self) -> Option<DeliveryId> {
        let current = self.next?;
        self.next = self
            .connection
            .deliveries
            .get(current.0)
            .and_then(|delivery| delivery.work.next());
        Some(current)
    }
}
