use aptwatch_core::{
    Announcement, NaturalKey, PricedUnitType, SourceFamily, StoredAnnouncement, Transaction,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::{AnnouncementStore, StoreError, TransactionStore, UnitTypeStore};

const ANNOUNCEMENT_COLUMNS: &str = "id, family, management_no, notice_no, name, house_section, \
     area, announce_date, receipt_start, receipt_end, winner_date, contact, homepage_url, \
     notice_url, total_supply, address, postal_code, collected_at";

/// PostgreSQL-backed store. Tables `announcements`, `unit_types` and `transactions` must exist.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i32(value: Option<u32>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

fn announcement_from_row(row: &PgRow) -> Result<StoredAnnouncement, StoreError> {
    let family: String = row.try_get("family")?;
    let family = family
        .parse::<SourceFamily>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let total_supply: Option<i32> = row.try_get("total_supply")?;
    let total_supply = total_supply
        .map(u32::try_from)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("total_supply: {e}")))?;

    Ok(StoredAnnouncement {
        id: row.try_get("id")?,
        announcement: Announcement {
            family,
            management_no: row.try_get("management_no")?,
            notice_no: row.try_get("notice_no")?,
            name: row.try_get("name")?,
            house_section: row.try_get("house_section")?,
            area: row.try_get("area")?,
            announce_date: row.try_get("announce_date")?,
            receipt_start: row.try_get("receipt_start")?,
            receipt_end: row.try_get("receipt_end")?,
            winner_date: row.try_get("winner_date")?,
            contact: row.try_get("contact")?,
            homepage_url: row.try_get("homepage_url")?,
            notice_url: row.try_get("notice_url")?,
            total_supply,
            address: row.try_get("address")?,
            postal_code: row.try_get("postal_code")?,
            collected_at: row.try_get("collected_at")?,
        },
    })
}

fn unit_type_from_row(row: &PgRow) -> Result<PricedUnitType, StoreError> {
    let general: i32 = row.try_get("general_supply")?;
    let special: i32 = row.try_get("special_supply")?;
    Ok(PricedUnitType {
        management_no: row.try_get("management_no")?,
        house_type: row.try_get("house_type")?,
        supply_area: row.try_get("supply_area")?,
        general_supply: general.max(0) as u32,
        special_supply: special.max(0) as u32,
        top_price: row.try_get("top_price")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, StoreError> {
    Ok(Transaction {
        admin_code: row.try_get("admin_code")?,
        deal_year_month: row.try_get("deal_year_month")?,
        building_name: row.try_get("building_name")?,
        price: row.try_get("price")?,
        exclusive_area: row.try_get("exclusive_area")?,
        floor: row.try_get("floor")?,
        build_year: row.try_get("build_year")?,
        deal_date: row.try_get("deal_date")?,
        neighborhood: row.try_get("neighborhood")?,
    })
}

#[async_trait]
impl AnnouncementStore for PgStore {
    async fn find_by_natural_key(
        &self,
        key: &NaturalKey,
    ) -> Result<Option<StoredAnnouncement>, StoreError> {
        let sql = format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements \
             WHERE family = $1 AND name = $2 AND receipt_start = $3"
        );
        let row = sqlx::query(&sql)
            .bind(key.family.as_str())
            .bind(&key.name)
            .bind(key.receipt_start)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(announcement_from_row).transpose()
    }

    async fn insert(&self, announcement: &Announcement) -> Result<StoredAnnouncement, StoreError> {
        let id = Uuid::new_v4();
        let a = announcement;
        let inserted = sqlx::query(
            r#"
            INSERT INTO announcements
                (id, family, management_no, notice_no, name, house_section, area,
                 announce_date, receipt_start, receipt_end, winner_date, contact,
                 homepage_url, notice_url, total_supply, address, postal_code, collected_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (family, name, receipt_start) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(a.family.as_str())
        .bind(&a.management_no)
        .bind(&a.notice_no)
        .bind(&a.name)
        .bind(&a.house_section)
        .bind(&a.area)
        .bind(a.announce_date)
        .bind(a.receipt_start)
        .bind(a.receipt_end)
        .bind(a.winner_date)
        .bind(&a.contact)
        .bind(&a.homepage_url)
        .bind(&a.notice_url)
        .bind(to_i32(a.total_supply))
        .bind(&a.address)
        .bind(&a.postal_code)
        .bind(a.collected_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(_) => Ok(StoredAnnouncement {
                id,
                announcement: announcement.clone(),
            }),
            None => Err(StoreError::Conflict(announcement.natural_key())),
        }
    }

    async fn update(&self, stored: &StoredAnnouncement) -> Result<(), StoreError> {
        let a = &stored.announcement;
        let result = sqlx::query(
            r#"
            UPDATE announcements
               SET management_no = $2,
                   notice_no = $3,
                   house_section = $4,
                   area = $5,
                   announce_date = $6,
                   receipt_start = $7,
                   receipt_end = $8,
                   winner_date = $9,
                   homepage_url = $10,
                   notice_url = $11,
                   total_supply = $12,
                   address = $13,
                   postal_code = $14,
                   collected_at = $15
             WHERE id = $1
            "#,
        )
        .bind(stored.id)
        .bind(&a.management_no)
        .bind(&a.notice_no)
        .bind(&a.house_section)
        .bind(&a.area)
        .bind(a.announce_date)
        .bind(a.receipt_start)
        .bind(a.receipt_end)
        .bind(a.winner_date)
        .bind(&a.homepage_url)
        .bind(&a.notice_url)
        .bind(to_i32(a.total_supply))
        .bind(&a.address)
        .bind(&a.postal_code)
        .bind(a.collected_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(stored.id));
        }
        Ok(())
    }

    async fn delete_received_before(&self, cutoff: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM announcements WHERE receipt_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_by_family_area(
        &self,
        family: SourceFamily,
        area: &str,
    ) -> Result<Vec<Announcement>, StoreError> {
        let sql = format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements \
             WHERE family = $1 AND area = $2 ORDER BY receipt_start DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(family.as_str())
            .bind(area)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| announcement_from_row(row).map(|s| s.announcement))
            .collect()
    }

    async fn list_by_family(
        &self,
        family: SourceFamily,
    ) -> Result<Vec<StoredAnnouncement>, StoreError> {
        let sql = format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements \
             WHERE family = $1 ORDER BY receipt_start DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(family.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(announcement_from_row).collect()
    }
}

#[async_trait]
impl UnitTypeStore for PgStore {
    async fn unit_types_for(
        &self,
        management_no: &str,
    ) -> Result<Vec<PricedUnitType>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT management_no, house_type, supply_area, general_supply, special_supply, top_price
              FROM unit_types
             WHERE management_no = $1
             ORDER BY house_type
            "#,
        )
        .bind(management_no)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(unit_type_from_row).collect()
    }

    async fn insert_unit_types(&self, unit_types: &[PricedUnitType]) -> Result<usize, StoreError> {
        let mut inserted = 0usize;
        for unit in unit_types {
            let result = sqlx::query(
                r#"
                INSERT INTO unit_types
                    (management_no, house_type, supply_area, general_supply, special_supply, top_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (management_no, house_type) DO NOTHING
                "#,
            )
            .bind(&unit.management_no)
            .bind(&unit.house_type)
            .bind(unit.supply_area)
            .bind(to_i32(Some(unit.general_supply)).unwrap_or(i32::MAX))
            .bind(to_i32(Some(unit.special_supply)).unwrap_or(i32::MAX))
            .bind(unit.top_price)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn transactions_for_code(
        &self,
        admin_code: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT admin_code, deal_year_month, building_name, price, exclusive_area,
                   floor, build_year, deal_date, neighborhood
              FROM transactions
             WHERE admin_code = $1
            "#,
        )
        .bind(admin_code)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }
}
