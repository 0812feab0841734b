//! # arena：连接内对象的代际槽位存储
//!
//! ## 核心意图（Why）
//! - Session、Link、Delivery 之间存在多条交叠的双向链表（会话集合、链路集合、脏端点列表、
//!   两条工作列表、链路内投递链），若直接持有引用会与借用规则正面冲突；
//! - 以“槽位下标 + 代际号”作为句柄，让链表指针退化为可复制的索引，释放后旧句柄自动失效，
//!   杜绝悬挂访问。
//!
//! ## 契约（What）
//! - [`Arena::insert`] 返回 [`Index`]；同一槽位被回收再复用时代际号递增，旧 `Index` 不再命中；
//! - [`Arena::retire`] 回收槽位但保留对象本身，旧句柄可经 [`Arena::retired`] 读到它被回收时的
//!   链表指针，直到槽位被复用；
//! - 空闲槽位按回收顺序复用，且至少积攒 [`REUSE_QUARANTINE`] 个之后才开始复用；
//! - 所有访问均为 O(1)，不做任何隐式搬移。

use std::collections::VecDeque;

use core::fmt;

/// 空闲槽位积攒到该数量之后才开始复用。
pub(crate) const REUSE_QUARANTINE: usize = 32;

/// 槽位句柄：槽位下标与代际号的组合。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Index {
    slot: u32,
    generation: u32,
}

impl Index {
    /// 槽位下标，仅用于诊断输出。
    pub fn slot(self) -> u32 {
        self.slot
    }

    /// 代际号，仅用于诊断输出。
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    /// `generation` 为下一次占用时使用的代际号；`retired` 为上一代被回收时留下的对象。
    Vacant { generation: u32, retired: Option<T> },
}

/// 代际槽位存储。
///
/// - **逻辑 (How)**：空闲槽位以先进先出队列复用；`retire` 将槽位置为 `Vacant`，
///   把代际号加一并把对象留在槽内，直到槽位被下一次 `insert` 覆盖。
/// - **风险 (Trade-offs)**：槽位数只增不减，长连接上的峰值占用会保留到连接释放；
///   隔离区内的已回收对象同样占用内存，调用方应在回收前清空其中的大块缓冲。
#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: VecDeque<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            len: 0,
        }
    }
}

impl<T> Arena<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, value: T) -> Index {
        self.len += 1;
        if self.free.len() > REUSE_QUARANTINE {
            if let Some(slot) = self.free.pop_front() {
                let entry = &mut self.slots[slot as usize];
                let generation = match entry {
                    Slot::Vacant { generation, .. } => *generation,
                    Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
                };
                *entry = Slot::Occupied { generation, value };
                return Index { slot, generation };
            }
        }

        let slot = u32::try_from(self.slots.len()).expect("arena exceeded u32::MAX slots");
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        Index {
            slot,
            generation: 0,
        }
    }

    pub(crate) fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    pub(crate) fn get(&self, index: Index) -> Option<&T> {
        match self.slots.get(index.slot as usize)? {
            Slot::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        match self.slots.get_mut(index.slot as usize)? {
            Slot::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// 回收槽位并保留对象；返回被保留对象的只读引用。句柄未命中时返回 `None`。
    pub(crate) fn retire(&mut self, index: Index) -> Option<&T> {
        let entry = self.slots.get_mut(index.slot as usize)?;
        if !matches!(entry, Slot::Occupied { generation, .. } if *generation == index.generation) {
            return None;
        }
        let placeholder = Slot::Vacant {
            generation: index.generation,
            retired: None,
        };
        let Slot::Occupied { generation, value } = core::mem::replace(entry, placeholder) else {
            unreachable!("slot checked as occupied");
        };
        *entry = Slot::Vacant {
            generation: generation.wrapping_add(1),
            retired: Some(value),
        };
        self.free.push_back(index.slot);
        self.len -= 1;
        match entry {
            Slot::Vacant { retired, .. } => retired.as_ref(),
            Slot::Occupied { .. } => None,
        }
    }

    /// 句柄所指对象已被回收且槽位尚未复用时，返回回收时保留的对象。
    pub(crate) fn retired(&self, index: Index) -> Option<&T> {
        match self.slots.get(index.slot as usize)? {
            Slot::Vacant {
                generation,
                retired: Some(value),
            } if *generation == index.generation.wrapping_add(1) => Some(value),
            _ => None,
        }
    }

    /// 存活对象，或尚可读取的已回收对象。
    pub(crate) fn get_or_retired(&self, index: Index) -> Option<&T> {
        self.get(index).or_else(|| self.retired(index))
    }
}

/// 为对象句柄生成强类型包装，避免 Session/Link/Delivery 句柄互相混用。
macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
        pub struct $name(pub(crate) $crate::arena::Index);

        impl $name {
            /// 底层槽位句柄。
            pub fn index(self) -> $crate::arena::Index {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

pub(crate) use define_handle;
