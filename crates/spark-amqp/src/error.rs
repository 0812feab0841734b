//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为引擎对外暴露的失败语义提供集中定义：非法参数、失效句柄、角色不符、编解码失败与配置错误；
//! - 引用计数下溢属于不变量破坏，直接 panic，不出现在本枚举中。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，可被 `?` 直接传播；
//! - 每个变体对应一个稳定的点分错误码（[`EngineError::code`]），便于上层告警聚合；
//! - 编解码错误以独立变体 [`EngineError::Codec`] 承载，绝不与引擎自身错误混淆。

use thiserror::Error;

use crate::{
    codec::CodecError,
    delivery::DeliveryId,
    link::{LinkId, Role},
    session::SessionId,
};

/// 引擎统一结果类型。
pub type Result<T, E = EngineError> = core::result::Result<T, E>;

/// 引擎错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：以细粒度枚举区分“调用方传参错误”“句柄已失效”“协作方失败”，
///   让嵌入方在不解析字符串的前提下决定处置策略；
/// - **契约 (What)**：
///   - 返回错误时不会修改任何引擎状态；
///   - `Unknown*` 变体表示句柄所指对象已被回收，或句柄并非本连接签发；
/// - **风险 (Trade-offs)**：`InvalidArgument` 以 `&'static str` 标注参数名，新增参数校验时需保持命名稳定。
#[derive(Debug, Error)]
pub enum EngineError {
    /// 参数超出允许范围，例如 `outgoing_window ∉ [0, 2^32-1]`。
    #[error("invalid argument `{argument}`: {detail}")]
    InvalidArgument {
        argument: &'static str,
        detail: String,
    },

    /// 会话句柄已失效。
    #[error("session {0} is not registered on this connection")]
    UnknownSession(SessionId),

    /// 链路句柄已失效。
    #[error("link {0} is not registered on this connection")]
    UnknownLink(LinkId),

    /// 投递句柄已失效。
    #[error("delivery {0} is not registered on this connection")]
    UnknownDelivery(DeliveryId),

    /// 操作要求特定角色的链路。
    ///
    /// - **契约 (What)**：`expected` 为操作所需角色，例如 `send` 只能作用于 Sender 上的投递。
    #[error("link {link} is not a {expected}")]
    RoleMismatch { link: LinkId, expected: Role },

    /// 编解码协作方返回的失败，原样透传。
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// 配置文本无法解析或取值非法。
    #[error("invalid engine configuration: {detail}")]
    Config { detail: String },
}

impl EngineError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidArgument { .. } => "amqp.argument.invalid",
            EngineError::UnknownSession(_) => "amqp.session.unknown",
            EngineError::UnknownLink(_) => "amqp.link.unknown",
            EngineError::UnknownDelivery(_) => "amqp.delivery.unknown",
            EngineError::RoleMismatch { .. } => "amqp.link.role_mismatch",
            EngineError::Codec(_) => "amqp.codec.failure",
            EngineError::Config { .. } => "amqp.config.invalid",
        }
    }

    /// 是否为编解码协作方产生的错误。
    pub fn is_codec(&self) -> bool {
        matches!(self, EngineError::Codec(_))
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config {
            detail: err.to_string(),
        }
    }
}
