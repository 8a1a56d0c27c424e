//! Price rule table operations.

use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{CategoryMode, DurationBucket, PriceRule};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Make the table hold exactly `rules`; keys missing from the set are dropped
    pub fn replace_price_rules(&self, rules: &[PriceRule]) -> ServiceResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute("DELETE FROM price_rules", [])
            .map_err(DatabaseError::Query)?;

        for rule in rules {
            tx.execute(
                r#"
                INSERT INTO price_rules (bucket, category, amount) VALUES (?1, ?2, ?3)
                ON CONFLICT(bucket, category) DO UPDATE SET amount = excluded.amount
                "#,
                params![rule.bucket.as_ref(), rule.category.as_ref(), rule.amount],
            )
            .map_err(DatabaseError::Query)?;
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    /// Amount for a (bucket, mode) key, if a rule exists
    pub fn find_price(
        &self,
        bucket: DurationBucket,
        category: CategoryMode,
    ) -> ServiceResult<Option<i64>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT amount FROM price_rules WHERE bucket = ?1 AND category = ?2",
            params![bucket.as_ref(), category.as_ref()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| DatabaseError::Query(e).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(bucket: DurationBucket, category: CategoryMode, amount: i64) -> PriceRule {
        PriceRule {
            bucket,
            category,
            amount,
        }
    }

    #[test]
    fn test_replace_and_lookup() {
        let db = Database::open_in_memory().unwrap();

        db.replace_price_rules(&[
            rule(DurationBucket::Short, CategoryMode::Online, 500),
            rule(DurationBucket::Short, CategoryMode::Online, 550),
        ])
        .unwrap();

        // Later duplicates win
        assert_eq!(
            db.find_price(DurationBucket::Short, CategoryMode::Online).unwrap(),
            Some(550)
        );
        assert_eq!(
            db.find_price(DurationBucket::Long, CategoryMode::Online).unwrap(),
            None
        );
    }

    #[test]
    fn test_replace_drops_rules_missing_from_new_set() {
        let db = Database::open_in_memory().unwrap();

        db.replace_price_rules(&[
            rule(DurationBucket::Short, CategoryMode::Online, 500),
            rule(DurationBucket::Long, CategoryMode::InPerson, 1300),
        ])
        .unwrap();
        db.replace_price_rules(&[rule(DurationBucket::Long, CategoryMode::InPerson, 1400)])
            .unwrap();

        assert_eq!(
            db.find_price(DurationBucket::Short, CategoryMode::Online).unwrap(),
            None
        );
        assert_eq!(
            db.find_price(DurationBucket::Long, CategoryMode::InPerson).unwrap(),
            Some(1400)
        );

        db.replace_price_rules(&[]).unwrap();
        assert_eq!(
            db.find_price(DurationBucket::Long, CategoryMode::InPerson).unwrap(),
            None
        );
    }
}
