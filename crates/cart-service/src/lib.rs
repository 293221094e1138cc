//! 购物车服务
//!
//! 无 HTTP 接口的后台工作进程：消费订单创建事件清空购物车，
//! 并定时扫描长期不活跃的购物车发布放弃事件。

pub mod abandonment;
pub mod consumer;
pub mod model;
pub mod store;
