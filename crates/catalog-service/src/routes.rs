//! 商品目录服务 HTTP 路由
//!
//! - `PUT /api/stocks` 批量库存更新（订单服务同步调用）
//! - `GET /api/stocks/{product_id}` 查询单个商品库存
//! - `GET /health` 存活探针

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, put};
use uuid::Uuid;
use validator::Validate;

use shop_shared::error::ShopError;

use crate::error::Result;
use crate::model::{Stock, StockUpdateRequest};
use crate::service::StockService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StockService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stocks", put(update_stocks))
        .route("/api/stocks/{product_id}", get(get_stock))
        .route("/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn update_stocks(
    State(state): State<AppState>,
    Json(req): Json<StockUpdateRequest>,
) -> Result<StatusCode> {
    req.validate()?;
    state.service.apply(&req.items).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<Json<Stock>> {
    let stock = state
        .service
        .get(product_id)
        .await?
        .ok_or_else(|| ShopError::not_found("Stock", product_id))?;
    Ok(Json(stock))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
