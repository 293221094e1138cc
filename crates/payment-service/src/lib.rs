//! 支付服务
//!
//! 统一的支付网关抽象（Mock / Stripe / MercadoPago）、支付与退款编排、
//! 支付结果事件发布。网关拒绝不是错误——它是一次记录在案的失败支付。

pub mod error;
pub mod gateway;
pub mod model;
pub mod processor;
pub mod routes;
pub mod store;
