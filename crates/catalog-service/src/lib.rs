//! 商品目录服务
//!
//! 管理商品库存：同步库存更新接口（供订单服务扣减）、
//! 订单事件消费者（创建审计、取消返还）以及库存变动事件发布。

pub mod consumer;
pub mod dedup;
pub mod error;
pub mod model;
pub mod routes;
pub mod service;
pub mod store;
