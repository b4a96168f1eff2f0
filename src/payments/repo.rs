use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgExecutor;
use uuid::Uuid;

use super::repo_types::{Payment, PaymentStatus};
use crate::store::PgStore;

const PAYMENT_COLUMNS: &str = "id, inspection_id, user_id, amount_cents, currency, \
     external_intent_id, status, invoice_number, invoice_key, paid_at, created_at, updated_at";

#[async_trait]
pub trait PaymentRepo: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> anyhow::Result<()>;
    async fn get_payment(&self, id: Uuid) -> anyhow::Result<Option<Payment>>;
    async fn find_payment_by_intent(&self, intent_id: &str) -> anyhow::Result<Option<Payment>>;
    async fn list_payments_for_inspection(&self, inspection_id: Uuid) -> anyhow::Result<Vec<Payment>>;
    async fn list_payments_for_user(
        &self,
        user_id: Uuid,
        status: Option<PaymentStatus>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Payment>, i64)>;
    /// Writes `next` only while the stored status is still `expected`.
    async fn update_payment(&self, next: &Payment, expected: PaymentStatus) -> anyhow::Result<bool>;
    /// Writes the completed payment and, in the same transaction, promotes the
    /// linked inspection from pending to confirmed. Guarded like `update_payment`.
    async fn complete_payment(&self, next: &Payment, expected: PaymentStatus) -> anyhow::Result<bool>;
}

/// True when `err` wraps a Postgres unique-constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(db)) if db.is_unique_violation()
    )
}

async fn update_exec<'e, E: PgExecutor<'e>>(
    exec: E,
    next: &Payment,
    expected: PaymentStatus,
) -> anyhow::Result<bool> {
    let res = sqlx::query(
        r#"
        UPDATE payments
           SET status = $2, invoice_number = $3, invoice_key = $4, paid_at = $5, updated_at = $6
         WHERE id = $1 AND status = $7
        "#,
    )
    .bind(next.id)
    .bind(next.status)
    .bind(&next.invoice_number)
    .bind(&next.invoice_key)
    .bind(next.paid_at)
    .bind(next.updated_at)
    .bind(expected)
    .execute(exec)
    .await
    .context("update payment")?;
    Ok(res.rows_affected() == 1)
}

#[async_trait]
impl PaymentRepo for PgStore {
    async fn insert_payment(&self, p: &Payment) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(p.id)
        .bind(p.inspection_id)
        .bind(p.user_id)
        .bind(p.amount_cents)
        .bind(&p.currency)
        .bind(&p.external_intent_id)
        .bind(p.status)
        .bind(&p.invoice_number)
        .bind(&p.invoice_key)
        .bind(p.paid_at)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&self.db)
        .await
        .context("insert payment")?;
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> anyhow::Result<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get payment")?;
        Ok(row)
    }

    async fn find_payment_by_intent(&self, intent_id: &str) -> anyhow::Result<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_intent_id = $1"
        ))
        .bind(intent_id)
        .fetch_optional(&self.db)
        .await
        .context("find payment by intent")?;
        Ok(row)
    }

    async fn list_payments_for_inspection(&self, inspection_id: Uuid) -> anyhow::Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE inspection_id = $1 ORDER BY created_at"
        ))
        .bind(inspection_id)
        .fetch_all(&self.db)
        .await
        .context("list payments for inspection")?;
        Ok(rows)
    }

    async fn list_payments_for_user(
        &self,
        user_id: Uuid,
        status: Option<PaymentStatus>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Payment>, i64)> {
        let rows = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE user_id = $1 AND ($2::payment_status IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list payments")?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments \
             WHERE user_id = $1 AND ($2::payment_status IS NULL OR status = $2)",
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.db)
        .await
        .context("count payments")?;

        Ok((rows, total))
    }

    async fn update_payment(&self, next: &Payment, expected: PaymentStatus) -> anyhow::Result<bool> {
        update_exec(&self.db, next, expected).await
    }

    async fn complete_payment(&self, next: &Payment, expected: PaymentStatus) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        if !update_exec(&mut *tx, next, expected).await? {
            tx.rollback().await.context("rollback tx")?;
            return Ok(false);
        }
        sqlx::query(
            r#"
            UPDATE inspections
               SET status = 'confirmed', version = version + 1, updated_at = now()
             WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(next.inspection_id)
        .execute(&mut *tx)
        .await
        .context("promote inspection")?;
        tx.commit().await.context("commit tx")?;
        Ok(true)
    }
}
