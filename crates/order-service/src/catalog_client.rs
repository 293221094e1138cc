//! 商品目录服务库存客户端
//!
//! 订单创建编排器通过该客户端同步调用商品目录服务的库存更新接口。
//! 调用只受客户端超时约束，不做截止时间传播；请求携带服务间静态密钥头。

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use shop_shared::config::CatalogClientConfig;
use shop_shared::error::{Result, ShopError};

/// 库存动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub enum StockAction {
    Add,
    Subtract,
}

/// 单个商品的库存变动量
#[derive(Debug, Clone)]
pub struct StockChange {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// 商品目录库存接口抽象
///
/// 编排器依赖该 trait，测试中用内存实现替换 HTTP 调用。
#[async_trait]
pub trait CatalogStockApi: Send + Sync {
    async fn update_stock(&self, changes: &[StockChange], action: StockAction) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StockUpdateItem {
    product_id: Uuid,
    quantity: i32,
    action: StockAction,
}

#[derive(Serialize)]
struct StockUpdateRequest {
    items: Vec<StockUpdateItem>,
}

/// HTTP 实现
pub struct HttpCatalogClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCatalogClient {
    pub fn new(config: &CatalogClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ShopError::Internal(format!("构造 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CatalogStockApi for HttpCatalogClient {
    async fn update_stock(&self, changes: &[StockChange], action: StockAction) -> Result<()> {
        let body = StockUpdateRequest {
            items: changes
                .iter()
                .map(|c| StockUpdateItem {
                    product_id: c.product_id,
                    quantity: c.quantity,
                    action,
                })
                .collect(),
        };

        let url = format!("{}/api/stocks", self.base_url);
        let response = self
            .http
            .put(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ShopError::ExternalServiceTimeout {
                        service: "catalog-service".to_string(),
                    }
                } else {
                    ShopError::ExternalService {
                        service: "catalog-service".to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(items = changes.len(), ?action, "库存更新调用成功");
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        warn!(%status, detail, "库存更新调用被拒绝");
        Err(ShopError::ExternalService {
            service: "catalog-service".to_string(),
            message: format!("库存更新被拒绝: HTTP {status}: {detail}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_action_serializes_as_variant_name() {
        assert_eq!(
            serde_json::to_string(&StockAction::Subtract).unwrap(),
            "\"Subtract\""
        );
        assert_eq!(serde_json::to_string(&StockAction::Add).unwrap(), "\"Add\"");
    }

    #[test]
    fn test_request_body_shape() {
        let body = StockUpdateRequest {
            items: vec![StockUpdateItem {
                product_id: Uuid::now_v7(),
                quantity: 2,
                action: StockAction::Subtract,
            }],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"productId\""));
        assert!(json.contains("\"quantity\":2"));
        assert!(json.contains("\"action\":\"Subtract\""));
    }
}
