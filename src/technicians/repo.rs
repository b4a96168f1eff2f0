use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgExecutor;
use uuid::Uuid;

use super::repo_types::{TechnicianFilter, TechnicianListing, TechnicianProfile};
use crate::store::PgStore;

const PROFILE_COLUMNS: &str = "id, user_id, license_number, specialization, years_of_experience, \
     bio, hourly_rate_cents, average_rating, total_inspections, total_reviews, is_available, \
     created_at, updated_at";

#[async_trait]
pub trait TechnicianRepo: Send + Sync {
    async fn insert_profile(&self, profile: &TechnicianProfile) -> anyhow::Result<()>;
    async fn get_profile_by_user(&self, user_id: Uuid) -> anyhow::Result<Option<TechnicianProfile>>;
    async fn find_profile_by_license(
        &self,
        license_number: &str,
    ) -> anyhow::Result<Option<TechnicianProfile>>;
    /// Writes the self-service columns. Derived aggregates are left untouched.
    async fn update_profile(&self, profile: &TechnicianProfile) -> anyhow::Result<()>;
    /// Highest rated first.
    async fn list_technicians(
        &self,
        filter: &TechnicianFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<TechnicianListing>, i64)>;
    /// Recomputes rating mean and counts from the inspections table.
    /// `None` when the user has no profile.
    async fn recompute_stats(&self, user_id: Uuid) -> anyhow::Result<Option<TechnicianProfile>>;
}

/// Full recomputation; run on the caller's transaction when one is open.
pub(crate) async fn recompute_stats_exec<'e, E: PgExecutor<'e>>(
    exec: E,
    user_id: Uuid,
) -> anyhow::Result<Option<TechnicianProfile>> {
    let row = sqlx::query_as::<_, TechnicianProfile>(&format!(
        r#"
        UPDATE technicians
           SET average_rating = COALESCE(
                   (SELECT AVG(rating)::float8 FROM inspections
                     WHERE technician_id = $1 AND rating IS NOT NULL), 0),
               total_reviews = (SELECT COUNT(*)::int FROM inspections
                                 WHERE technician_id = $1 AND rating IS NOT NULL),
               total_inspections = (SELECT COUNT(*)::int FROM inspections
                                     WHERE technician_id = $1 AND status = 'completed'),
               updated_at = now()
         WHERE user_id = $1
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(user_id)
    .fetch_optional(exec)
    .await
    .context("recompute technician stats")?;
    Ok(row)
}

#[async_trait]
impl TechnicianRepo for PgStore {
    async fn insert_profile(&self, p: &TechnicianProfile) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO technicians ({PROFILE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(p.id)
        .bind(p.user_id)
        .bind(&p.license_number)
        .bind(&p.specialization)
        .bind(p.years_of_experience)
        .bind(&p.bio)
        .bind(p.hourly_rate_cents)
        .bind(p.average_rating)
        .bind(p.total_inspections)
        .bind(p.total_reviews)
        .bind(p.is_available)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&self.db)
        .await
        .context("insert technician profile")?;
        Ok(())
    }

    async fn get_profile_by_user(&self, user_id: Uuid) -> anyhow::Result<Option<TechnicianProfile>> {
        let row = sqlx::query_as::<_, TechnicianProfile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM technicians WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("get technician profile")?;
        Ok(row)
    }

    async fn find_profile_by_license(
        &self,
        license_number: &str,
    ) -> anyhow::Result<Option<TechnicianProfile>> {
        let row = sqlx::query_as::<_, TechnicianProfile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM technicians WHERE license_number = $1"
        ))
        .bind(license_number)
        .fetch_optional(&self.db)
        .await
        .context("find technician by license")?;
        Ok(row)
    }

    async fn update_profile(&self, p: &TechnicianProfile) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE technicians
               SET license_number = $2, specialization = $3, years_of_experience = $4, bio = $5,
                   hourly_rate_cents = $6, is_available = $7, updated_at = $8
             WHERE user_id = $1
            "#,
        )
        .bind(p.user_id)
        .bind(&p.license_number)
        .bind(&p.specialization)
        .bind(p.years_of_experience)
        .bind(&p.bio)
        .bind(p.hourly_rate_cents)
        .bind(p.is_available)
        .bind(p.updated_at)
        .execute(&self.db)
        .await
        .context("update technician profile")?;
        Ok(())
    }

    async fn list_technicians(
        &self,
        filter: &TechnicianFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<TechnicianListing>, i64)> {
        const FROM_WHERE: &str = r#"
            FROM technicians t
            JOIN users u ON u.id = t.user_id
           WHERE u.is_active
             AND ($1::text IS NULL OR t.specialization = $1)
             AND ($2::float8 IS NULL OR t.average_rating >= $2)
             AND ($3::text IS NULL OR u.name ILIKE '%' || $3 || '%')
             AND ($4::bool IS NULL OR t.is_available = $4)
        "#;

        let rows = sqlx::query_as::<_, TechnicianListing>(&format!(
            "SELECT t.id, t.user_id, t.license_number, t.specialization, t.years_of_experience, \
                    t.bio, t.hourly_rate_cents, t.average_rating, t.total_inspections, \
                    t.total_reviews, t.is_available, t.created_at, t.updated_at, u.name, u.email \
             {FROM_WHERE} \
             ORDER BY t.average_rating DESC, t.created_at ASC LIMIT $5 OFFSET $6"
        ))
        .bind(&filter.specialization)
        .bind(filter.min_rating)
        .bind(&filter.search)
        .bind(filter.available)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list technicians")?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {FROM_WHERE}"))
            .bind(&filter.specialization)
            .bind(filter.min_rating)
            .bind(&filter.search)
            .bind(filter.available)
            .fetch_one(&self.db)
            .await
            .context("count technicians")?;

        Ok((rows, total))
    }

    async fn recompute_stats(&self, user_id: Uuid) -> anyhow::Result<Option<TechnicianProfile>> {
        recompute_stats_exec(&self.db, user_id).await
    }
}
