//! 订单服务 HTTP 错误响应
//!
//! 将共享错误类型映射为稳定的 problem-details 响应体：
//! `{ "type", "title", "status", "errors" }`。
//! errors 字段仅在参数校验失败时出现，内容为 字段 -> 错误消息列表。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use shop_shared::error::ShopError;

/// 订单服务对外错误包装
#[derive(Debug)]
pub struct ApiError(pub ShopError);

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ShopError::Validation { .. } => StatusCode::BAD_REQUEST,
            ShopError::NotFound { .. } => StatusCode::NOT_FOUND,
            // 409：请求合法但与订单当前状态冲突
            ShopError::InvalidStateTransition { .. } | ShopError::InsufficientStock { .. } => {
                StatusCode::CONFLICT
            }
            ShopError::ExternalService { .. } | ShopError::Gateway { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ShopError::ExternalServiceTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ShopError::Database(_)
            | ShopError::Redis(_)
            | ShopError::Kafka(_)
            | ShopError::Config(_)
            | ShopError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// type 字段：由错误码派生的稳定标识
    pub fn problem_type(&self) -> String {
        format!(
            "/errors/{}",
            self.0.code().to_lowercase().replace('_', "-")
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志，防止信息泄露
        let title = match &self.0 {
            ShopError::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            ShopError::Redis(e) => {
                tracing::error!(error = %e, "Redis 操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            ShopError::Kafka(e) => {
                tracing::error!(error = %e, "Kafka 操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            ShopError::Internal(e) | ShopError::Config(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "type": self.problem_type(),
            "title": title,
            "status": status.as_u16(),
        });

        if let ShopError::Validation { errors } = &self.0
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("errors".to_string(), json!(errors));
        }

        (status, axum::Json(body)).into_response()
    }
}

impl From<ShopError> for ApiError {
    fn from(err: ShopError) -> Self {
        Self(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self(ShopError::from(errors))
    }
}

/// HTTP 层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;
