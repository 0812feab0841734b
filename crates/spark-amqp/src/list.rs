//! # list：基于槽位索引的侵入式双向链表
//!
//! ## 核心意图（Why）
//! - 连接需要同时维护会话集合、链路集合、脏端点列表、应用工作列表与传输工作列表，
//!   同一个对象可能同时位于多条链表中；
//! - 每个成员在自身结构中预留一组 [`ListLinks`]，链表头只记录首尾，插入与摘除均为 O(1)。
//!
//! ## 契约（What）
//! - [`List::push_back`] 与 [`List::remove`] 通过 `linked` 标志保证幂等：重复插入或重复摘除
//!   均返回 `false` 且不改动任何指针；
//! - 摘除后成员保留原有 `next` 指针，已经停在该成员上的遍历者仍可继续前进；
//!   [`first_linked`] 沿这些指针跳过此后同样被摘除的成员，落到首个仍在链表中的成员上。

/// 成员侧的链表槽位。
#[derive(Clone, Copy, Debug)]
pub(crate) struct ListLinks<K> {
    prev: Option<K>,
    next: Option<K>,
    linked: bool,
}

impl<K> Default for ListLinks<K> {
    fn default() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }
}

impl<K: Copy> ListLinks<K> {
    pub(crate) fn is_linked(&self) -> bool {
        self.linked
    }

    pub(crate) fn next(&self) -> Option<K> {
        self.next
    }
}

/// 从存储中定位某个成员链表槽位的访问器。
///
/// 以函数指针而非闭包表达，保证返回引用的生命周期与存储借用绑定。
pub(crate) type LinksMut<S, K> = fn(&mut S, K) -> Option<&mut ListLinks<K>>;

/// 从 `cursor` 出发沿前向指针找到首个仍在链表中的成员。
///
/// - **契约 (What)**：`links` 对无法定位的成员返回 `None`，遍历随之结束；
/// - **逻辑 (How)**：被摘除成员的 `next` 只会指向摘除当时仍在链表中的成员，
///   沿该指针前进时摘除时刻严格递增，因此不会成环。
pub(crate) fn first_linked<K: Copy>(
    mut cursor: Option<K>,
    links: impl Fn(K) -> Option<ListLinks<K>>,
) -> Option<K> {
    while let Some(key) = cursor {
        let slot = links(key)?;
        if slot.linked {
            return Some(key);
        }
        cursor = slot.next;
    }
    None
}

/// 链表头。
#[derive(Debug)]
pub(crate) struct List<K> {
    head: Option<K>,
    tail: Option<K>,
    len: usize,
}

impl<K> Default for List<K> {
    fn default() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }
}

impl<K: Copy + Eq> List<K> {
    pub(crate) fn head(&self) -> Option<K> {
        self.head
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// 追加到队尾；成员已在链表中或无法定位时返回 `false`。
    pub(crate) fn push_back<S>(&mut self, store: &mut S, key: K, links: LinksMut<S, K>) -> bool {
        let previous_tail = self.tail;
        {
            let Some(slot) = links(store, key) else {
                return false;
            };
            if slot.linked {
                return false;
            }
            slot.prev = previous_tail;
            slot.next = None;
            slot.linked = true;
        }

        let tail_slot = match previous_tail {
            Some(tail) => links(store, tail),
            None => None,
        };
        match tail_slot {
            Some(tail) => tail.next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.len += 1;
        true
    }

    /// 从链表摘除；成员不在链表中时返回 `false`。
    pub(crate) fn remove<S>(&mut self, store: &mut S, key: K, links: LinksMut<S, K>) -> bool {
        let (prev, next) = {
            let Some(slot) = links(store, key) else {
                return false;
            };
            if !slot.linked {
                return false;
            }
            slot.linked = false;
            let prev = slot.prev.take();
            (prev, slot.next)
        };

        let prev_slot = match prev {
            Some(p) => links(store, p),
            None => None,
        };
        match prev_slot {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        let next_slot = match next {
            Some(n) => links(store, n),
            None => None,
        };
        match next_slot {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
        if self.head == Some(key) {
            self.head = next;
        }
        if self.tail == Some(key) {
            self.tail = prev;
        }
        self.len -= 1;
        true
    }
}
