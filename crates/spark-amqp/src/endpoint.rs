//! # endpoint：Connection / Session / Link 共享的端点基座
//!
//! ## 定位与职责（Why）
//! - AMQP 的三类端点共享同一套生命周期：本地状态与远端状态各自沿
//!   `UNINITIALIZED → ACTIVE → CLOSED` 单向推进，携带错误条件、脏标记与引用计数；
//! - 本模块只描述“数据形状”与状态判定，真正的跃迁、事件投递与回收逻辑由
//!   [`Connection`](crate::Connection) 依据 [`EndpointId`] 的变体分派完成。
//!
//! ## 契约（What）
//! - [`EndpointState::can_advance_to`] 定义唯一合法的前进方向，禁止回退；
//! - [`StateFilter`] 是三种状态的位集合，[`StateFilter::ANY`] 对应“不设过滤”；
//! - [`EndpointHeader`] 的 `refcount` 初始为 1，代表所有者持有的那一份引用；`finalized`
//!   保证终结钩子至多运行一次。

use core::fmt;

use crate::{event::EventType, link::LinkId, list::ListLinks, session::SessionId};

/// 端点状态。
///
/// # 教案式说明
/// - **意图 (Why)**：同一枚举同时描述本地与远端视角，便于过滤查询统一处理；
/// - **契约 (What)**：只允许沿声明顺序前进，`CLOSED` 为终态；
/// - **风险 (Trade-offs)**：AMQP 的 detach/end 细分语义不在此建模，由上层协议状态补充。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum EndpointState {
    /// 尚未打开。
    Uninitialized,
    /// 已打开。
    Active,
    /// 已关闭。
    Closed,
}

impl EndpointState {
    /// 判断能否从当前状态前进到 `target`。
    ///
    /// - **契约 (What)**：相同状态返回 `false`（视为无操作），回退返回 `false`；
    ///   `Uninitialized → Closed` 属于跳过中间态的前进，允许。
    pub fn can_advance_to(self, target: EndpointState) -> bool {
        matches!(
            (self, target),
            (EndpointState::Uninitialized, EndpointState::Active)
                | (EndpointState::Uninitialized, EndpointState::Closed)
                | (EndpointState::Active, EndpointState::Closed)
        )
    }

    const fn bit(self) -> u8 {
        match self {
            EndpointState::Uninitialized => 0b001,
            EndpointState::Active => 0b010,
            EndpointState::Closed => 0b100,
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EndpointState::Uninitialized => "UNINITIALIZED",
            EndpointState::Active => "ACTIVE",
            EndpointState::Closed => "CLOSED",
        })
    }
}

/// 端点状态过滤集合。
///
/// # 教案式说明
/// - **意图 (Why)**：`session_head`/`link_head` 需要“本地状态 ∈ L 且远端状态 ∈ R”的查询；
/// - **契约 (What)**：以三位掩码表示集合；[`StateFilter::ANY`] 匹配任意状态，等价于未设过滤；
///   空集合 [`StateFilter::NONE`] 不匹配任何端点；
/// - **执行 (How)**：`contains` 为一次按位与，查询成本与集合大小无关。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StateFilter(u8);

impl StateFilter {
    /// 不设过滤。
    pub const ANY: StateFilter = StateFilter(0b111);
    /// 空集合。
    pub const NONE: StateFilter = StateFilter(0);
    /// 仅 `UNINITIALIZED`。
    pub const UNINITIALIZED: StateFilter = StateFilter(EndpointState::Uninitialized.bit());
    /// 仅 `ACTIVE`。
    pub const ACTIVE: StateFilter = StateFilter(EndpointState::Active.bit());
    /// 仅 `CLOSED`。
    pub const CLOSED: StateFilter = StateFilter(EndpointState::Closed.bit());

    /// 由若干状态构造集合。
    pub fn of(states: &[EndpointState]) -> Self {
        states
            .iter()
            .fold(StateFilter::NONE, |acc, state| acc.with(*state))
    }

    /// 返回追加 `state` 后的集合。
    #[must_use]
    pub const fn with(self, state: EndpointState) -> Self {
        StateFilter(self.0 | state.bit())
    }

    pub fn contains(self, state: EndpointState) -> bool {
        self.0 & state.bit() != 0
    }

    pub fn is_any(self) -> bool {
        self == StateFilter::ANY
    }
}

impl Default for StateFilter {
    fn default() -> Self {
        StateFilter::ANY
    }
}

impl From<EndpointState> for StateFilter {
    fn from(state: EndpointState) -> Self {
        StateFilter(state.bit())
    }
}

/// AMQP 错误条件（`error` 复合类型的简化投影）。
///
/// - **契约 (What)**：`condition` 为符号化错误名（如 `amqp:internal-error`），为空表示“无错误”；
///   `description` 为可读描述。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ErrorCondition {
    pub condition: Option<String>,
    pub description: Option<String>,
}

impl ErrorCondition {
    pub fn new(condition: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            description: Some(description.into()),
        }
    }

    /// 条件是否已设置。
    pub fn is_set(&self) -> bool {
        self.condition.is_some()
    }

    pub fn clear(&mut self) {
        self.condition = None;
        self.description = None;
    }
}

/// 端点句柄：Connection / Session / Link 三种变体的和类型。
///
/// # 教案式说明
/// - **意图 (Why)**：生命周期钩子（本地打开/关闭、释放、终结）按变体分派，
///   以 `match` 取代继承体系中的抽象方法；
/// - **契约 (What)**：连接在其自身内部唯一，因此 `Connection` 变体不携带索引；
/// - **风险 (Trade-offs)**：新增端点种类时需同步补齐 [`Connection`](crate::Connection) 中所有分派点。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EndpointId {
    Connection,
    Session(SessionId),
    Link(LinkId),
}

impl EndpointId {
    /// 本地打开钩子对应的事件。
    pub(crate) fn local_open_event(self) -> EventType {
        match self {
            EndpointId::Connection => EventType::ConnectionLocalOpen,
            EndpointId::Session(_) => EventType::SessionLocalOpen,
            EndpointId::Link(_) => EventType::LinkLocalOpen,
        }
    }

    /// 本地关闭钩子对应的事件。
    pub(crate) fn local_close_event(self) -> EventType {
        match self {
            EndpointId::Connection => EventType::ConnectionLocalClose,
            EndpointId::Session(_) => EventType::SessionLocalClose,
            EndpointId::Link(_) => EventType::LinkLocalClose,
        }
    }

    pub(crate) fn remote_open_event(self) -> EventType {
        match self {
            EndpointId::Connection => EventType::ConnectionRemoteOpen,
            EndpointId::Session(_) => EventType::SessionRemoteOpen,
            EndpointId::Link(_) => EventType::LinkRemoteOpen,
        }
    }

    pub(crate) fn remote_close_event(self) -> EventType {
        match self {
            EndpointId::Connection => EventType::ConnectionRemoteClose,
            EndpointId::Session(_) => EventType::SessionRemoteClose,
            EndpointId::Link(_) => EventType::LinkRemoteClose,
        }
    }

    /// 引用计数归零时的终结事件。
    pub(crate) fn final_event(self) -> EventType {
        match self {
            EndpointId::Connection => EventType::ConnectionFinal,
            EndpointId::Session(_) => EventType::SessionFinal,
            EndpointId::Link(_) => EventType::LinkFinal,
        }
    }
}

impl From<SessionId> for EndpointId {
    fn from(id: SessionId) -> Self {
        EndpointId::Session(id)
    }
}

impl From<LinkId> for EndpointId {
    fn from(id: LinkId) -> Self {
        EndpointId::Link(id)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::Connection => f.write_str("connection"),
            EndpointId::Session(id) => fmt::Display::fmt(id, f),
            EndpointId::Link(id) => fmt::Display::fmt(id, f),
        }
    }
}

/// 三类端点共享的生命周期字段。
///
/// # 教案式说明
/// - **意图 (Why)**：把状态、错误条件、脏标记与引用计数集中在一处，供连接按统一流程驱动；
/// - **契约 (What)**：
///   - `refcount` 初始为 1（所有者的那一份），归零即终结且只终结一次；
///   - `freed` 至多由 `false` 变为 `true` 一次；
///   - `modified_links` 是该端点在连接脏列表中的槽位，由连接独占维护。
#[derive(Debug)]
pub(crate) struct EndpointHeader {
    pub(crate) local_state: EndpointState,
    pub(crate) remote_state: EndpointState,
    pub(crate) local_condition: ErrorCondition,
    pub(crate) remote_condition: ErrorCondition,
    pub(crate) modified: bool,
    pub(crate) modified_links: ListLinks<EndpointId>,
    pub(crate) refcount: usize,
    pub(crate) freed: bool,
    pub(crate) finalized: bool,
}

impl Default for EndpointHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointHeader {
    pub(crate) fn new() -> Self {
        Self {
            local_state: EndpointState::Uninitialized,
            remote_state: EndpointState::Uninitialized,
            local_condition: ErrorCondition::default(),
            remote_condition: ErrorCondition::default(),
            modified: false,
            modified_links: ListLinks::default(),
            refcount: 1,
            freed: false,
            finalized: false,
        }
    }

    /// 判断端点是否满足一对状态过滤条件。
    pub(crate) fn matches(&self, local: StateFilter, remote: StateFilter) -> bool {
        local.contains(self.local_state) && remote.contains(self.remote_state)
    }
}

/// 端点只读视图中对外开放的公共字段访问。
///
/// Session 与 Link 的只读结构体都实现该 trait，调用方可以在不区分变体的情况下读取状态。
pub trait Endpoint {
    fn local_state(&self) -> EndpointState;
    fn remote_state(&self) -> EndpointState;
    fn condition(&self) -> &ErrorCondition;
    fn remote_condition(&self) -> &ErrorCondition;
    fn is_modified(&self) -> bool;
    fn refcount(&self) -> usize;
    fn is_freed(&self) -> bool;
}

macro_rules! impl_endpoint_via_header {
    ($ty:ty) => {
        impl $crate::endpoint::Endpoint for $ty {
            fn local_state(&self) -> $crate::endpoint::EndpointState {
                self.header.local_state
            }
            fn remote_state(&self) -> $crate::endpoint::EndpointState {
                self.header.remote_state
            }
            fn condition(&self) -> &$crate::endpoint::ErrorCondition {
                &self.header.local_condition
            }
            fn remote_condition(&self) -> &$crate::endpoint::ErrorCondition {
                &self.header.remote_condition
            }
            fn is_modified(&self) -> bool {
                self.header.modified
            }
            fn refcount(&self) -> usize {
                self.header.refcount
            }
            fn is_freed(&self) -> bool {
                self.header.freed
            }
        }
    };
}

pub(crate) use impl_endpoint_via_header;
