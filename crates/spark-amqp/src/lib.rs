//! # spark-amqp
//!
//! ## 定位与职责（Why）
//! - AMQP 1.0 协议引擎的连接级对象模型：Connection、Session、Link、Delivery 四类对象的
//!   生命周期、引用计数与相互记账；
//! - 引擎不做任何网络 I/O（sans-I/O），字节由外部传输驱动泵入泵出，驱动通过
//!   工作列表、传输工作列表与脏端点列表得知“自上次轮询以来发生了什么”。
//!
//! ## 架构嵌入（Where）
//! - `connection` 持有全部对象存储，端点生命周期在此统一分派；
//! - `session`、`link`、`delivery` 各自定义只读视图，并以 `impl Connection` 的形式提供修改操作；
//! - `work` 维护两条工作列表；`event` 定义事件与收集器；
//! - `codec`、`transport` 描述外部协作方契约，`config` 描述初始参数。
//!
//! ## 使用约束（Trade-offs）
//! - 单线程、同步执行，所有操作不阻塞也不回调用户代码（传输驱动的通知除外）；
//! - 句柄只在签发它的连接内有效，对象回收后旧句柄的查询返回 `Unknown*` 错误，
//!   停在其上的 `*_next` 遍历仍可继续前进。

#![deny(unsafe_code)]

mod arena;
mod list;

/// 外部编解码协作方契约。
pub mod codec;

/// 引擎初始参数与 TOML 加载。
pub mod config;

/// 连接端点与对象存储。
pub mod connection;

/// 投递、处置状态与字节缓冲。
///
/// - **契约定位 (What)**：结算后的投递在离开传输工作列表时回收。
pub mod delivery;

/// 端点共享的状态、过滤集合与错误条件。
pub mod endpoint;

/// 错误类型集中声明处。
pub mod error;

/// 生命周期事件与收集器。
pub mod event;

/// 发送端与接收端链路。
pub mod link;

/// 会话端点与链路注册表。
pub mod session;

/// 传输驱动协作方契约。
pub mod transport;

/// 应用工作列表与传输工作列表。
pub mod work;

pub use arena::Index;
pub use codec::{Codec, CodecError};
pub use config::{EngineConfig, SessionDefaults};
pub use connection::Connection;
pub use delivery::{Delivery, DeliveryId, DeliveryState, Recv};
pub use endpoint::{Endpoint, EndpointId, EndpointState, ErrorCondition, StateFilter};
pub use error::{EngineError, Result};
pub use event::{Collector, Event, EventContext, EventType};
pub use link::{Link, LinkId, Role};
pub use session::{Session, SessionId};
pub use transport::{RemoteOpen, Transport};
pub use work::WorkSequence;
