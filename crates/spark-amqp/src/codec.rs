//! # codec：投递载荷的编解码协作契约
//!
//! ## 定位（Why）
//! - AMQP 类型系统的二进制编解码不在引擎内实现，引擎只负责把投递缓冲中的字节交给协作方；
//! - 以关联类型区分入站与出站业务对象，与工作区其他编解码契约保持同一形状。
//!
//! ## 契约（What）
//! - `decode` 只消费一条完整值所需的前缀字节，剩余字节留在 `src` 中；
//! - 字节不足时返回 [`CodecError::Truncated`]，调用方可在更多字节到达后重试。

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// 编解码失败。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CodecError {
    /// 输入不足以构成一条完整的值。
    #[error("truncated input: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// 输入字节不符合编码规则。
    #[error("malformed input: {detail}")]
    Invalid { detail: String },
}

impl CodecError {
    /// 是否可以通过等待更多字节恢复。
    pub fn is_truncated(&self) -> bool {
        matches!(self, CodecError::Truncated { .. })
    }
}

/// 投递载荷编解码器。
///
/// # 教案式说明
/// - **意图 (Why)**：[`Connection::send_encoded`](crate::Connection::send_encoded) 与
///   [`Connection::recv_decoded`](crate::Connection::recv_decoded) 依赖该 trait 把值与投递缓冲互转；
/// - **契约 (What)**：
///   - `encode` 只追加写入 `dst`，不得改动已有内容；
///   - `decode` 成功时从 `src` 前端移除已消费字节，失败时 `src` 内容未定义，调用方需自行保留副本；
/// - **风险 (Trade-offs)**：接口以 `&self` 表达，需要缓存上下文的实现自行使用内部可变性。
pub trait Codec {
    /// 解码得到的值类型。
    type Incoming;
    /// 待编码的值类型。
    type Outgoing: ?Sized;

    fn encode(&self, item: &Self::Outgoing, dst: &mut BytesMut) -> Result<(), CodecError>;

    fn decode(&self, src: &mut Bytes) -> Result<Self::Incoming, CodecError>;
}
