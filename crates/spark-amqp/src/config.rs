//! # config：引擎初始参数
//!
//! ## 定位（Why）
//! - 容器标识、主机名、信道上限与会话窗口等初值通常来自部署配置，而非代码常量；
//! - 以 `serde` 描述结构、`toml` 承载文本，与工作区其余工具对契约文件的处理方式一致。
//!
//! ## 契约（What）
//! - 所有字段均可缺省，缺省值与 [`EngineConfig::default`] 相同；
//! - 未知字段直接拒绝，避免拼写错误被静默忽略。

use serde::Deserialize;

use crate::error::Result;

/// 会话缺省接收容量：1 MiB。
pub const DEFAULT_INCOMING_CAPACITY: usize = 1024 * 1024;
/// 会话缺省发送窗口：2^31 - 1。
pub const DEFAULT_OUTGOING_WINDOW: u32 = i32::MAX as u32;
/// 缺省信道上限。
pub const DEFAULT_MAX_CHANNELS: u16 = u16::MAX;

/// 连接级配置。
///
/// ```
/// use spark_amqp::EngineConfig;
///
/// let config = EngineConfig::from_toml_str(
///     r#"
///     container_id = "broker-a"
///     [session]
///     outgoing_window = 128
///     "#,
/// )?;
/// assert_eq!(config.container_id, "broker-a");
/// assert_eq!(config.session.outgoing_window, 128);
/// assert_eq!(config.max_channels, 65535);
/// # Ok::<(), spark_amqp::EngineError>(())
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// 本地容器标识，写入 open 帧。
    pub container_id: String,
    /// 期望连接的虚拟主机名。
    pub hostname: Option<String>,
    pub max_channels: u16,
    /// 新建会话的初值。
    pub session: SessionDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            container_id: String::new(),
            hostname: None,
            max_channels: DEFAULT_MAX_CHANNELS,
            session: SessionDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// 从 TOML 文本解析配置。
    ///
    /// - **契约 (What)**：语法错误、类型不符（例如窗口超出 `u32`）或未知字段均返回
    ///   [`EngineError::Config`](crate::EngineError::Config)。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// 新建会话时采用的窗口与容量。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionDefaults {
    pub incoming_capacity: usize,
    pub outgoing_window: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            incoming_capacity: DEFAULT_INCOMING_CAPACITY,
            outgoing_window: DEFAULT_OUTGOING_WINDOW,
        }
    }
}
