//! 商品目录服务 HTTP 错误响应
//!
//! 与订单服务相同的 problem-details 形状。库存不足映射为 409：
//! 请求本身合法，但与当前库存水平冲突。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use shop_shared::error::ShopError;

#[derive(Debug)]
pub struct ApiError(pub ShopError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ShopError::Validation { .. } => StatusCode::BAD_REQUEST,
            ShopError::NotFound { .. } => StatusCode::NOT_FOUND,
            ShopError::InsufficientStock { .. } | ShopError::InvalidStateTransition { .. } => {
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
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

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
            "type": format!("/errors/{}", self.0.code().to_lowercase().replace('_', "-")),
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

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_is_conflict() {
        let err = ApiError(ShopError::InsufficientStock {
            product_id: "p-1".into(),
            requested: 5,
            available: 2,
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_insufficient_stock_body() {
        let err = ApiError(ShopError::InsufficientStock {
            product_id: "p-1".into(),
            requested: 5,
            available: 2,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["type"], "/errors/insufficient-stock");
        assert_eq!(body["status"], 409);
        // 标题包含商品与数量信息，方便调用方直接记录
        assert!(body["title"].as_str().unwrap().contains("p-1"));
    }

    #[test]
    fn test_validation_is_bad_request() {
        let err = ApiError(ShopError::validation("items", "变更列表不能为空"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
