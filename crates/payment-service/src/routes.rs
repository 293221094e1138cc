//! 支付服务 HTTP 路由
//!
//! - `POST /api/payments` 处理一次支付
//! - `POST /api/payments/{id}/refund` 退款
//! - `GET  /api/payments/{id}` 查询支付
//! - `GET  /health` 存活探针

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use uuid::Uuid;

use crate::error::Result;
use crate::model::Payment;
use crate::processor::{PaymentProcessor, ProcessPaymentCommand, RefundCommand};
use crate::store::PaymentStore;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<PaymentProcessor>,
    pub store: Arc<dyn PaymentStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/payments", post(process_payment))
        .route("/api/payments/{id}/refund", post(refund_payment))
        .route("/api/payments/{id}", get(get_payment))
        .route("/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// 支付被网关拒绝也返回 201：支付记录已创建，结果在 status 字段里
async fn process_payment(
    State(state): State<AppState>,
    Json(cmd): Json<ProcessPaymentCommand>,
) -> Result<(StatusCode, Json<Payment>)> {
    let payment = state.processor.process(cmd).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(cmd): Json<RefundCommand>,
) -> Result<Json<Payment>> {
    let payment = state.processor.refund(id, cmd).await?;
    Ok(Json(payment))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>> {
    let payment = state.store.find(id).await?;
    Ok(Json(payment))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
