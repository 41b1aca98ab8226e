use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BmiRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bmi: f64,
    pub calculation_unit: String,
    pub category: String,
    pub height: f64,
    pub weight: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewBmiRecord {
    pub user_id: Uuid,
    pub bmi: f64,
    pub calculation_unit: String,
    pub category: String,
    pub height: f64,
    pub weight: f64,
}

#[async_trait]
pub trait BmiStore: Send + Sync {
    async fn insert(&self, record: NewBmiRecord) -> anyhow::Result<BmiRecord>;
    /// Newest first.
    async fn list_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<BmiRecord>>;
}

#[derive(Clone)]
pub struct PgBmiStore {
    db: PgPool,
}

impl PgBmiStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BmiStore for PgBmiStore {
    async fn insert(&self, record: NewBmiRecord) -> anyhow::Result<BmiRecord> {
        let row = sqlx::query_as::<_, BmiRecord>(
            r#"
            INSERT INTO bmi_records (user_id, bmi, calculation_unit, category, height, weight)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, bmi, calculation_unit, category, height, weight, created_at
            "#,
        )
        .bind(record.user_id)
        .bind(record.bmi)
        .bind(&record.calculation_unit)
        .bind(&record.category)
        .bind(record.height)
        .bind(record.weight)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn list_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<BmiRecord>> {
        let rows = sqlx::query_as::<_, BmiRecord>(
            r#"
            SELECT id, user_id, bmi, calculation_unit, category, height, weight, created_at
            FROM bmi_records
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}
