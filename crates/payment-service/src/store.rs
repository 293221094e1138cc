//! 支付存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use shop_shared::error::{Result, ShopError};

use crate::model::{Payment, PaymentDetail, PaymentStatus, PaymentTransaction};

const PAYMENT_COLUMNS: &str = "id, order_id, client_id, client_email, client_name, amount, \
     currency, status, method, transaction_id, gateway, error_message, paid_at, \
     created_at, updated_at";

/// 支付存储抽象，编排器在测试中用内存实现替换
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_pending(&self, payment: &Payment) -> Result<()>;

    /// 追加一条网关调用记录，成败都记
    async fn record_attempt(&self, attempt: &PaymentTransaction) -> Result<()>;

    async fn save_detail(&self, detail: &PaymentDetail) -> Result<()>;

    async fn mark_completed(
        &self,
        payment_id: Uuid,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_failed(&self, payment_id: Uuid, error_message: &str) -> Result<()>;

    async fn mark_refunded(
        &self,
        payment_id: Uuid,
        refund_transaction_id: Option<&str>,
    ) -> Result<()>;

    async fn find(&self, payment_id: Uuid) -> Result<Payment>;
}

/// PostgreSQL 支付存储
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert_pending(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            "INSERT INTO payments (id, order_id, client_id, client_email, client_name, amount, \
             currency, status, method, gateway, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.client_id)
        .bind(&payment.client_email)
        .bind(&payment.client_name)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(payment.method)
        .bind(&payment.gateway)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_attempt(&self, attempt: &PaymentTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO payment_transactions (id, payment_id, transaction_type, amount, \
             success, gateway_response, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(attempt.id)
        .bind(attempt.payment_id)
        .bind(attempt.transaction_type)
        .bind(attempt.amount)
        .bind(attempt.success)
        .bind(&attempt.gateway_response)
        .bind(&attempt.error_message)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_detail(&self, detail: &PaymentDetail) -> Result<()> {
        sqlx::query(
            "INSERT INTO payment_details (id, payment_id, card_brand, card_last4, billing_email) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(detail.id)
        .bind(detail.payment_id)
        .bind(&detail.card_brand)
        .bind(&detail.card_last4)
        .bind(&detail.billing_email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        payment_id: Uuid,
        transaction_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE payments SET status = $2, transaction_id = $3, paid_at = $4, updated_at = $4 \
             WHERE id = $1",
        )
        .bind(payment_id)
        .bind(PaymentStatus::Completed)
        .bind(transaction_id)
        .bind(paid_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, payment_id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE payments SET status = $2, error_message = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(payment_id)
        .bind(PaymentStatus::Failed)
        .bind(error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_refunded(
        &self,
        payment_id: Uuid,
        refund_transaction_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE payments SET status = $2, transaction_id = COALESCE($3, transaction_id), \
             updated_at = $4 WHERE id = $1",
        )
        .bind(payment_id)
        .bind(PaymentStatus::Refunded)
        .bind(refund_transaction_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, payment_id: Uuid) -> Result<Payment> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        sqlx::query_as::<_, Payment>(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ShopError::not_found("Payment", payment_id))
    }
}
