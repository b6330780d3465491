//! Rule and quick filter repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{MatchRuleDbModel, QuickFilterDbModel};
use crate::domain::rule::{QuickFilter, Rule};
use crate::{Error, Result};

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn get_rule(&self, id: &str) -> Result<Rule>;
    async fn list_rules(&self) -> Result<Vec<Rule>>;
    async fn create_rule(&self, rule: &Rule) -> Result<()>;
    async fn update_rule(&self, rule: &Rule) -> Result<()>;
    async fn delete_rule(&self, id: &str) -> Result<()>;

    /// The stored quick filter, or a disabled default.
    async fn get_quick_filter(&self) -> Result<QuickFilter>;
    async fn save_quick_filter(&self, filter: &QuickFilter) -> Result<()>;
}

pub struct SqlxRuleRepository {
    pool: SqlitePool,
}

impl SqlxRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleRepository for SqlxRuleRepository {
    async fn get_rule(&self, id: &str) -> Result<Rule> {
        sqlx::query_as::<_, MatchRuleDbModel>("SELECT * FROM match_rule WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("MatchRule", id))?
            .into_domain()
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query_as::<_, MatchRuleDbModel>(
            "SELECT * FROM match_rule ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MatchRuleDbModel::into_domain).collect()
    }

    async fn create_rule(&self, rule: &Rule) -> Result<()> {
        rule.validate()?;
        let row = MatchRuleDbModel::from_domain(rule)?;
        sqlx::query(
            r#"
            INSERT INTO match_rule (
                id, name, description, enabled, include_keywords, exclude_keywords,
                min_price, max_price, include_locations, exclude_locations,
                match_logic, target_ids, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.description)
        .bind(row.enabled)
        .bind(&row.include_keywords)
        .bind(&row.exclude_keywords)
        .bind(row.min_price)
        .bind(row.max_price)
        .bind(&row.include_locations)
        .bind(&row.exclude_locations)
        .bind(&row.match_logic)
        .bind(&row.target_ids)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_rule(&self, rule: &Rule) -> Result<()> {
        rule.validate()?;
        let row = MatchRuleDbModel::from_domain(rule)?;
        let result = sqlx::query(
            r#"
            UPDATE match_rule SET
                name = ?,
                description = ?,
                enabled = ?,
                include_keywords = ?,
                exclude_keywords = ?,
                min_price = ?,
                max_price = ?,
                include_locations = ?,
                exclude_locations = ?,
                match_logic = ?,
                target_ids = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&row.name)
        .bind(&row.description)
        .bind(row.enabled)
        .bind(&row.include_keywords)
        .bind(&row.exclude_keywords)
        .bind(row.min_price)
        .bind(row.max_price)
        .bind(&row.include_locations)
        .bind(&row.exclude_locations)
        .bind(&row.match_logic)
        .bind(&row.target_ids)
        .bind(row.updated_at)
        .bind(&row.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("MatchRule", &rule.id));
        }
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM match_rule WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_quick_filter(&self) -> Result<QuickFilter> {
        let row = sqlx::query_as::<_, QuickFilterDbModel>("SELECT * FROM quick_filter WHERE id = ?")
            .bind(QuickFilterDbModel::ROW_ID)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row.into_domain(),
            None => Ok(QuickFilter::default()),
        }
    }

    async fn save_quick_filter(&self, filter: &QuickFilter) -> Result<()> {
        filter.validate()?;
        let row = QuickFilterDbModel::from_domain(filter)?;
        sqlx::query(
            r#"
            INSERT INTO quick_filter (
                id, enabled, include_keywords, exclude_keywords, min_price, max_price,
                include_locations, exclude_locations, target_ids, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                include_keywords = excluded.include_keywords,
                exclude_keywords = excluded.exclude_keywords,
                min_price = excluded.min_price,
                max_price = excluded.max_price,
                include_locations = excluded.include_locations,
                exclude_locations = excluded.exclude_locations,
                target_ids = excluded.target_ids,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(row.id)
        .bind(row.enabled)
        .bind(&row.include_keywords)
        .bind(&row.exclude_keywords)
        .bind(row.min_price)
        .bind(row.max_price)
        .bind(&row.include_locations)
        .bind(&row.exclude_locations)
        .bind(&row.target_ids)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
