//! spark-amqp 引擎行为测试入口。
//!
//! # 设计说明（Why）
//! - 以“契约域”划分子模块：端点生命周期、集合枚举、引用计数、工作列表、字节缓冲、
//!   传输绑定与编解码协作；
//! - 共享的构造器与记录型传输驱动放在 `support`，避免每个用例重复搭建连接。
//!
//! # 合约范围（What）
//! - 只通过 `spark_amqp` 的公共 API 观察行为：状态查询、事件收集器、工作列表遍历与日志输出。

mod support;

mod codec;
mod enumeration;
mod lifecycle;
mod refcount;
mod transport;
