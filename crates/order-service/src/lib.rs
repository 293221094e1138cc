//! 订单服务
//!
//! 负责订单创建编排（本地事务 + 同步库存扣减 + OrderCreated 事件）、
//! 订单状态机校验、支付结果消费以及订单查询 API。

pub mod catalog_client;
pub mod consumer;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod routes;
pub mod state_machine;
pub mod store;
