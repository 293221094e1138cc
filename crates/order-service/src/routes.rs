//! 订单服务 HTTP 路由
//!
//! - `POST /api/orders` 创建订单
//! - `GET  /api/orders/{id}` 查询订单及行快照
//! - `PUT  /api/orders/{id}/status` 经状态机校验的状态流转
//! - `GET  /health` 存活探针

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use shop_shared::events::{EventMeta, OrderCancelled, OrderItemInfo};
use shop_shared::kafka::{EventPublisher, publish_json, topics};

use crate::error::Result;
use crate::model::{Order, OrderItem};
use crate::orchestrator::{OrderCreateCommand, OrderCreateHandler};
use crate::state_machine::OrderStatus;
use crate::store::{PgOrderStore, TransitionOutcome};

/// 路由层共享状态
#[derive(Clone)]
pub struct AppState {
    pub store: PgOrderStore,
    pub create_handler: Arc<OrderCreateHandler>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// 状态流转请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
}

/// 订单详情响应：订单头 + 行快照
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/{id}", get(get_order))
        .route("/api/orders/{id}/status", put(update_status))
        .route("/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn create_order(
    State(state): State<AppState>,
    Json(cmd): Json<OrderCreateCommand>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = state.create_handler.handle(cmd).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>> {
    let order = state.store.find(id).await?;
    let items = state.store.find_items(id).await?;
    Ok(Json(OrderResponse { order, items }))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<Order>> {
    let outcome = state
        .store
        .apply_transition(
            id,
            req.status,
            req.reason.as_deref(),
            req.transaction_id.as_deref(),
            req.gateway.as_deref(),
        )
        .await?;

    info!(
        order_id = %id,
        status = %outcome.order.status,
        changed = outcome.changed,
        "订单状态已更新"
    );

    // 取消真正生效时才发布 OrderCancelled，驱动库存返还。
    // 幂等空操作不发布——每次发布的事件 ID 都不同，会绕过消费端去重
    // 造成重复返还。发布失败只记录日志——取消本身已生效，不回滚
    if should_publish_cancelled(&outcome) {
        publish_cancelled(&state, &outcome.order).await;
    }

    Ok(Json(outcome.order))
}

/// 仅在状态流转实际发生且目标为 Cancelled 时发布事件
fn should_publish_cancelled(outcome: &TransitionOutcome) -> bool {
    outcome.changed && outcome.order.status == OrderStatus::Cancelled
}

async fn publish_cancelled(state: &AppState, order: &Order) {
    let items = match state.store.find_items(order.id).await {
        Ok(items) => items,
        Err(e) => {
            warn!(order_id = %order.id, error = %e, "读取订单行失败，OrderCancelled 事件未发布");
            return;
        }
    };

    let event = OrderCancelled {
        meta: EventMeta::new(),
        order_id: order.id,
        client_id: order.client_id,
        client_email: order.client_email.clone(),
        client_name: order.client_name.clone(),
        total: order.total,
        cancellation_reason: order
            .cancellation_reason
            .clone()
            .unwrap_or_else(|| "未提供取消原因".to_string()),
        payment_id: None,
        items: items
            .iter()
            .map(|i| OrderItemInfo {
                product_id: i.product_id,
                quantity: i.quantity,
                unit_price: i.unit_price,
            })
            .collect(),
        cancelled_at: order.cancelled_at.unwrap_or(order.updated_at),
    };

    if let Err(e) = publish_json(
        state.publisher.as_ref(),
        topics::ORDER_CANCELLED,
        &order.id.to_string(),
        &event,
    )
    .await
    {
        warn!(order_id = %order.id, error = %e, "发布 OrderCancelled 事件失败");
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_request_camel_case() {
        let req: StatusUpdateRequest = serde_json::from_str(
            r#"{"status":"Cancelled","reason":"客户要求取消","transactionId":"t-1"}"#,
        )
        .unwrap();

        assert_eq!(req.status, OrderStatus::Cancelled);
        assert_eq!(req.reason.as_deref(), Some("客户要求取消"));
        assert_eq!(req.transaction_id.as_deref(), Some("t-1"));
        assert!(req.gateway.is_none());
    }

    #[test]
    fn test_status_update_request_minimal() {
        let req: StatusUpdateRequest = serde_json::from_str(r#"{"status":"Shipped"}"#).unwrap();
        assert_eq!(req.status, OrderStatus::Shipped);
        assert!(req.reason.is_none());
    }

    fn sample_order(status: OrderStatus) -> Order {
        use chrono::Utc;
        use rust_decimal_macros::dec;

        use crate::state_machine::PaymentType;

        let now = Utc::now();
        Order {
            id: Uuid::now_v7(),
            client_id: Uuid::now_v7(),
            client_email: "alice@example.com".to_string(),
            client_name: "Alice".to_string(),
            status,
            payment_type: PaymentType::CreditCard,
            total: dec!(20.00),
            shipping_street: "中山路 1 号".to_string(),
            shipping_city: "上海".to_string(),
            shipping_state: "".to_string(),
            shipping_zip_code: "200000".to_string(),
            shipping_country: "CN".to_string(),
            billing_street: "中山路 1 号".to_string(),
            billing_city: "上海".to_string(),
            billing_state: "".to_string(),
            billing_zip_code: "200000".to_string(),
            billing_country: "CN".to_string(),
            payment_transaction_id: None,
            payment_gateway: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
        }
    }

    /// 取消真正生效时发布一次；重复提交同状态（幂等空操作）不再发布
    #[test]
    fn test_cancelled_event_only_on_actual_transition() {
        let cancelled = TransitionOutcome {
            order: sample_order(OrderStatus::Cancelled),
            changed: true,
        };
        assert!(should_publish_cancelled(&cancelled));

        // 订单已是 Cancelled，本次请求是空操作——不发布
        let replay = TransitionOutcome {
            order: sample_order(OrderStatus::Cancelled),
            changed: false,
        };
        assert!(!should_publish_cancelled(&replay));

        // 非取消流转不发布
        let shipped = TransitionOutcome {
            order: sample_order(OrderStatus::Shipped),
            changed: true,
        };
        assert!(!should_publish_cancelled(&shipped));
    }
}
