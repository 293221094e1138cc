//! 支付服务 HTTP 错误响应
//!
//! 与其他服务一致的 problem-details 响应体。网关侧错误映射为 502，
//! 网关超时映射为 504，调用方可据此区分自身问题与上游问题。

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
            ShopError::InvalidStateTransition { .. } | ShopError::InsufficientStock { .. } => {
                StatusCode::CONFLICT
            }
            ShopError::Gateway { .. } | ShopError::ExternalService { .. } => {
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

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_errors_map_to_bad_gateway() {
        let err = ApiError(ShopError::Gateway {
            code: Some("card_declined".into()),
            message: "Your card was declined.".into(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.problem_type(), "/errors/gateway-error");

        let timeout = ApiError(ShopError::ExternalServiceTimeout {
            service: "stripe".into(),
        });
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_refund_conflict_maps_to_409() {
        let err = ApiError(ShopError::InvalidStateTransition {
            current: "Pending".into(),
            requested: "Refunded".into(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.problem_type(), "/errors/invalid-state-transition");
    }

    #[tokio::test]
    async fn test_validation_response_carries_errors_map() {
        let err = ApiError(ShopError::validation("token", "支付令牌不能为空"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["type"], "/errors/validation-error");
        assert_eq!(body["errors"]["token"][0], "支付令牌不能为空");
    }

    #[tokio::test]
    async fn test_database_error_hides_details() {
        let err = ApiError(ShopError::Internal("pool timed out".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["title"], "服务内部错误，请稍后重试");
    }
}
