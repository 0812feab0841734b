//! # transport：传输驱动协作契约
//!
//! 引擎不做任何 I/O。帧编码、分片与套接字读写由外部驱动完成，驱动经
//! [`Connection::bind_transport`](crate::Connection::bind_transport) 绑定后获得两类回调：
//! 端点被标记为脏时的唤醒，以及远端已结算投递在本地结算时的通知。

use crate::delivery::DeliveryId;

/// 传输驱动。
///
/// # 教案式说明
/// - **意图 (Why)**：让驱动在“有新输出”时被唤醒，而不是轮询整个连接；
/// - **契约 (What)**：
///   - 回调在引擎调用栈内同步执行，实现不得阻塞；
///   - 回调拿不到连接的可变借用，需要读取工作列表时应在回调返回后由驱动循环完成；
///   - 要求 `Send`，绑定驱动后的连接仍可整体移交给其他线程；
/// - **风险 (Trade-offs)**：`delivery_settled` 收到的句柄在回调返回后可能立即失效。
pub trait Transport: Send {
    /// 有端点被标记为脏，驱动应安排一次输出。
    fn notify_modified(&mut self);

    /// 远端已结算的投递完成本地结算，驱动可回收与之关联的帧状态。
    fn delivery_settled(&mut self, _delivery: DeliveryId) {}
}

/// 远端 open 帧中引擎关心的字段。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteOpen {
    pub container_id: Option<String>,
    pub hostname: Option<String>,
    pub offered_capabilities: Vec<String>,
    pub desired_capabilities: Vec<String>,
}
