//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 各服务在此基础上封装自己的 HTTP 错误响应。

use std::collections::HashMap;

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum ShopError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 缓存错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 业务逻辑错误 ====================
    /// 参数验证失败，errors 为字段名到错误消息列表的映射
    #[error("参数验证失败")]
    Validation {
        errors: HashMap<String, Vec<String>>,
    },

    #[error("非法状态流转: {current} -> {requested}")]
    InvalidStateTransition { current: String, requested: String },

    #[error("库存不足: product_id={product_id} 需要 {requested}, 剩余 {available}")]
    InsufficientStock {
        product_id: String,
        requested: i32,
        available: i32,
    },

    /// 支付网关拒绝或超时。该错误永远不会导致流程中断，
    /// 支付编排器会将其转化为 PaymentFailed 事件。
    #[error("支付网关错误: {message}")]
    Gateway {
        code: Option<String>,
        message: String,
    },

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    // ==================== 通用错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, ShopError>;

impl ShopError {
    /// 构造单字段验证错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.into(), vec![message.into()]);
        Self::Validation { errors }
    }

    /// 构造未找到错误
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::Gateway { .. } => "GATEWAY_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 仅基础设施层的瞬时故障可重试；业务错误（验证失败、状态流转非法、
    /// 网关拒绝）重试也不会改变结果，直接向上传播。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Redis(_)
                | Self::Kafka(_)
                | Self::ExternalServiceTimeout { .. }
        )
    }
}

/// 从 validator 错误转换：保留字段级错误消息，
/// 使调用方能够看到每个字段具体的校验失败原因。
impl From<validator::ValidationErrors> for ShopError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut map = HashMap::new();
        for (field, field_errors) in errors.field_errors() {
            let messages: Vec<String> = field_errors
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            map.insert(field.to_string(), messages);
        }
        Self::Validation { errors: map }
    }
}

impl From<config::ConfigError> for ShopError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
