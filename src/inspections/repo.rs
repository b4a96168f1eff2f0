use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgExecutor;
use uuid::Uuid;

use super::repo_types::{Inspection, InspectionFilter};
use crate::store::PgStore;
use crate::technicians::repo::recompute_stats_exec;

const INSPECTION_COLUMNS: &str = "id, client_id, technician_id, boat_name, boat_model, boat_year, \
     boat_length, listing_url, inspection_type, status, location, scheduled_date, completed_date, \
     price_cents, rating, comment, notes, version, created_at, updated_at";

#[async_trait]
pub trait InspectionRepo: Send + Sync {
    async fn insert_inspection(&self, inspection: &Inspection) -> anyhow::Result<()>;
    async fn get_inspection(&self, id: Uuid) -> anyhow::Result<Option<Inspection>>;
    /// Newest first. Returns the page and the total row count for the filter.
    async fn list_inspections(
        &self,
        filter: &InspectionFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Inspection>, i64)>;
    /// Writes `next` only if the stored row is still at `next.version - 1`.
    /// `false` means another writer got there first.
    async fn update_inspection(&self, next: &Inspection) -> anyhow::Result<bool>;
    /// Like [`InspectionRepo::update_inspection`], and recomputes the assigned
    /// technician's rating aggregates in the same transaction.
    async fn update_inspection_with_stats(&self, next: &Inspection) -> anyhow::Result<bool>;
    async fn delete_inspection(&self, id: Uuid, version: i64) -> anyhow::Result<bool>;
}

async fn update_exec<'e, E: PgExecutor<'e>>(exec: E, next: &Inspection) -> anyhow::Result<bool> {
    let res = sqlx::query(
        r#"
        UPDATE inspections
           SET technician_id = $2, boat_name = $3, boat_model = $4, boat_year = $5,
               boat_length = $6, listing_url = $7, inspection_type = $8, status = $9,
               location = $10, scheduled_date = $11, completed_date = $12, price_cents = $13,
               rating = $14, comment = $15, notes = $16, version = $17, updated_at = $18
         WHERE id = $1 AND version = $17 - 1
        "#,
    )
    .bind(next.id)
    .bind(next.technician_id)
    .bind(&next.boat_name)
    .bind(&next.boat_model)
    .bind(next.boat_year)
    .bind(next.boat_length)
    .bind(&next.listing_url)
    .bind(next.inspection_type)
    .bind(next.status)
    .bind(&next.location)
    .bind(next.scheduled_date)
    .bind(next.completed_date)
    .bind(next.price_cents)
    .bind(next.rating)
    .bind(&next.comment)
    .bind(&next.notes)
    .bind(next.version)
    .bind(next.updated_at)
    .execute(exec)
    .await
    .context("update inspection")?;
    Ok(res.rows_affected() == 1)
}

#[async_trait]
impl InspectionRepo for PgStore {
    async fn insert_inspection(&self, i: &Inspection) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO inspections ({INSPECTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"
        ))
        .bind(i.id)
        .bind(i.client_id)
        .bind(i.technician_id)
        .bind(&i.boat_name)
        .bind(&i.boat_model)
        .bind(i.boat_year)
        .bind(i.boat_length)
        .bind(&i.listing_url)
        .bind(i.inspection_type)
        .bind(i.status)
        .bind(&i.location)
        .bind(i.scheduled_date)
        .bind(i.completed_date)
        .bind(i.price_cents)
        .bind(i.rating)
        .bind(&i.comment)
        .bind(&i.notes)
        .bind(i.version)
        .bind(i.created_at)
        .bind(i.updated_at)
        .execute(&self.db)
        .await
        .context("insert inspection")?;
        Ok(())
    }

    async fn get_inspection(&self, id: Uuid) -> anyhow::Result<Option<Inspection>> {
        let row = sqlx::query_as::<_, Inspection>(&format!(
            "SELECT {INSPECTION_COLUMNS} FROM inspections WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get inspection")?;
        Ok(row)
    }

    async fn list_inspections(
        &self,
        filter: &InspectionFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Inspection>, i64)> {
        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR client_id = $1)
              AND ($2::uuid IS NULL OR technician_id = $2)
              AND ($3::inspection_status IS NULL OR status = $3)
              AND ($4::inspection_type IS NULL OR inspection_type = $4)
        "#;

        let rows = sqlx::query_as::<_, Inspection>(&format!(
            "SELECT {INSPECTION_COLUMNS} FROM inspections {WHERE} \
             ORDER BY created_at DESC LIMIT $5 OFFSET $6"
        ))
        .bind(filter.client_id)
        .bind(filter.technician_id)
        .bind(filter.status)
        .bind(filter.inspection_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list inspections")?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM inspections {WHERE}"))
            .bind(filter.client_id)
            .bind(filter.technician_id)
            .bind(filter.status)
            .bind(filter.inspection_type)
            .fetch_one(&self.db)
            .await
            .context("count inspections")?;

        Ok((rows, total))
    }

    async fn update_inspection(&self, next: &Inspection) -> anyhow::Result<bool> {
        update_exec(&self.db, next).await
    }

    async fn update_inspection_with_stats(&self, next: &Inspection) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        if !update_exec(&mut *tx, next).await? {
            tx.rollback().await.context("rollback tx")?;
            return Ok(false);
        }
        if let Some(technician_id) = next.technician_id {
            recompute_stats_exec(&mut *tx, technician_id).await?;
        }
        tx.commit().await.context("commit tx")?;
        Ok(true)
    }

    async fn delete_inspection(&self, id: Uuid, version: i64) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;
        // Settled payments stay; the RESTRICT foreign key then fails the delete.
        sqlx::query(
            "DELETE FROM payments WHERE inspection_id = $1 \
             AND status NOT IN ('completed', 'refunded')",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("delete unsettled payments")?;
        let res = sqlx::query("DELETE FROM inspections WHERE id = $1 AND version = $2")
            .bind(id)
            .bind(version)
            .execute(&mut *tx)
            .await
            .context("delete inspection")?;
        if res.rows_affected() != 1 {
            return Ok(false);
        }
        tx.commit().await.context("commit tx")?;
        Ok(true)
    }
}
