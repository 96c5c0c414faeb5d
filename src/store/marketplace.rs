//! Marketplace: categories, items and purchases
//!
//! A purchase decrements stock with a guarded update, debits the student
//! and records the purchase row in one SQLite transaction. Coins spent in
//! the marketplace leave circulation.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::store::database::Store;
use crate::store::error::{StoreError, StoreResult};
use crate::store::ledger::apply_transaction;
use crate::store::profiles::load_member;
use crate::store::schools::load_school;
use crate::store::types::{
    MarketplaceCategory, MarketplaceItem, MarketplacePurchase, NewTransaction, Transaction,
    TransactionType,
};

const ITEM_COLUMNS: &str =
    "id, school_id, category_id, name, description, price, stock, active, created_at";
const PURCHASE_COLUMNS: &str =
    "id, item_id, student_id, quantity, total_price, transaction_id, purchased_at";

/// Fields for creating an item
#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    pub school_id: i64,
    #[serde(default)]
    pub category_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: i64,
    pub stock: i64,
}

/// Fields that may change on an item
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub category_id: Option<i64>,
}

/// Filter for listing items
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemFilter {
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub active_only: bool,
}

/// Everything produced by a purchase
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub purchase: MarketplacePurchase,
    pub transaction: Transaction,
    /// Item as it stands after the purchase
    pub item: MarketplaceItem,
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<MarketplaceCategory> {
    Ok(MarketplaceCategory {
        id: row.get("id")?,
        school_id: row.get("school_id")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<MarketplaceItem> {
    Ok(MarketplaceItem {
        id: row.get("id")?,
        school_id: row.get("school_id")?,
        category_id: row.get("category_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        price: row.get("price")?,
        stock: row.get("stock")?,
        active: row.get("active")?,
        created_at: row.get("created_at")?,
    })
}

fn purchase_from_row(row: &Row<'_>) -> rusqlite::Result<MarketplacePurchase> {
    Ok(MarketplacePurchase {
        id: row.get("id")?,
        item_id: row.get("item_id")?,
        student_id: row.get("student_id")?,
        quantity: row.get("quantity")?,
        total_price: row.get("total_price")?,
        transaction_id: row.get("transaction_id")?,
        purchased_at: row.get("purchased_at")?,
    })
}

fn load_category(conn: &Connection, id: i64) -> StoreResult<MarketplaceCategory> {
    conn.query_row(
        "SELECT id, school_id, name, created_at FROM marketplace_categories WHERE id = ?1",
        params![id],
        category_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Category", id))
}

fn load_item(conn: &Connection, id: i64) -> StoreResult<MarketplaceItem> {
    conn.query_row(
        &format!("SELECT {} FROM marketplace_items WHERE id = ?1", ITEM_COLUMNS),
        params![id],
        item_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Item", id))
}

fn load_purchase(conn: &Connection, id: i64) -> StoreResult<MarketplacePurchase> {
    conn.query_row(
        &format!("SELECT {} FROM marketplace_purchases WHERE id = ?1", PURCHASE_COLUMNS),
        params![id],
        purchase_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Purchase", id))
}

/// A category must exist and belong to the item's school
fn check_category(conn: &Connection, category_id: Option<i64>, school_id: i64) -> StoreResult<()> {
    if let Some(id) = category_id {
        let category = load_category(conn, id)?;
        if category.school_id != school_id {
            return Err(StoreError::Validation(format!(
                "Category {} belongs to another school",
                id
            )));
        }
    }
    Ok(())
}

fn validate_price_and_stock(price: i64, stock: i64) -> StoreResult<()> {
    if price <= 0 {
        return Err(StoreError::Validation(
            "Price must be greater than zero".to_string(),
        ));
    }
    if stock < 0 {
        return Err(StoreError::Validation("Stock cannot be negative".to_string()));
    }
    Ok(())
}

impl Store {
    // ==================== Categories ====================

    pub fn create_category(&self, school_id: i64, name: &str) -> StoreResult<MarketplaceCategory> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation(
                "Category name cannot be empty".to_string(),
            ));
        }

        self.with_conn(|conn| {
            load_school(conn, school_id)?;
            conn.execute(
                "INSERT INTO marketplace_categories (school_id, name, created_at) VALUES (?1, ?2, ?3)",
                params![school_id, name.trim(), Utc::now()],
            )
            .map_err(|e| {
                StoreError::from_constraint(e, format!("Category '{}' already exists", name.trim()))
            })?;
            load_category(conn, conn.last_insert_rowid())
        })
    }

    pub fn get_category(&self, id: i64) -> StoreResult<MarketplaceCategory> {
        self.with_conn(|conn| load_category(conn, id))
    }

    pub fn list_categories(&self, school_id: i64) -> StoreResult<Vec<MarketplaceCategory>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, school_id, name, created_at FROM marketplace_categories
                 WHERE school_id = ?1 ORDER BY name",
            )?;
            let categories = stmt
                .query_map(params![school_id], category_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(categories)
        })
    }

    /// Delete a category; its items become uncategorized
    pub fn delete_category(&self, id: i64) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM marketplace_categories WHERE id = ?1",
                params![id],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found("Category", id));
            }
            Ok(())
        })
    }

    // ==================== Items ====================

    pub fn create_item(&self, new: NewItem) -> StoreResult<MarketplaceItem> {
        if new.name.trim().is_empty() {
            return Err(StoreError::Validation("Item name cannot be empty".to_string()));
        }
        validate_price_and_stock(new.price, new.stock)?;

        let item = self.with_tx(|tx| {
            load_school(tx, new.school_id)?;
            check_category(tx, new.category_id, new.school_id)?;
            tx.execute(
                "INSERT INTO marketplace_items
                    (school_id, category_id, name, description, price, stock, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
                params![
                    new.school_id,
                    new.category_id,
                    new.name.trim(),
                    new.description,
                    new.price,
                    new.stock,
                    Utc::now()
                ],
            )?;
            load_item(tx, tx.last_insert_rowid())
        })?;

        tracing::info!(item_id = item.id, price = item.price, stock = item.stock, "Created item");
        Ok(item)
    }

    pub fn get_item(&self, id: i64) -> StoreResult<MarketplaceItem> {
        self.with_conn(|conn| load_item(conn, id))
    }

    pub fn list_items(&self, school_id: i64, filter: &ItemFilter) -> StoreResult<Vec<MarketplaceItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM marketplace_items
                 WHERE school_id = ?1
                   AND (?2 IS NULL OR category_id = ?2)
                   AND (?3 = 0 OR active = 1)
                 ORDER BY name, id",
                ITEM_COLUMNS
            ))?;
            let items = stmt
                .query_map(
                    params![school_id, filter.category_id, filter.active_only],
                    item_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
    }

    pub fn update_item(&self, id: i64, update: ItemUpdate) -> StoreResult<MarketplaceItem> {
        self.with_tx(|tx| {
            let mut item = load_item(tx, id)?;

            if let Some(name) = update.name {
                if name.trim().is_empty() {
                    return Err(StoreError::Validation("Item name cannot be empty".to_string()));
                }
                item.name = name.trim().to_string();
            }
            if let Some(description) = update.description {
                item.description = Some(description);
            }
            if let Some(price) = update.price {
                item.price = price;
            }
            if let Some(stock) = update.stock {
                item.stock = stock;
            }
            if let Some(active) = update.active {
                item.active = active;
            }
            if update.category_id.is_some() {
                check_category(tx, update.category_id, item.school_id)?;
                item.category_id = update.category_id;
            }
            validate_price_and_stock(item.price, item.stock)?;

            tx.execute(
                "UPDATE marketplace_items
                 SET name = ?1, description = ?2, price = ?3, stock = ?4, active = ?5, category_id = ?6
                 WHERE id = ?7",
                params![
                    item.name,
                    item.description,
                    item.price,
                    item.stock,
                    item.active,
                    item.category_id,
                    id
                ],
            )?;
            Ok(item)
        })
    }

    // ==================== Purchases ====================

    /// Buy `quantity` of an item
    ///
    /// Stock is decremented with `WHERE stock >= quantity`, so concurrent
    /// buyers can never oversell; the debit uses the same guard on balance.
    pub fn purchase_item(&self, student_id: i64, item_id: i64, quantity: i64) -> StoreResult<PurchaseReceipt> {
        if quantity <= 0 {
            return Err(StoreError::Validation(
                "Quantity must be greater than zero".to_string(),
            ));
        }

        let receipt = self.with_tx(|tx| {
            let item = load_item(tx, item_id)?;
            if !item.active {
                return Err(StoreError::Validation(format!(
                    "Item {} is not available",
                    item_id
                )));
            }
            load_member(tx, student_id, item.school_id)?;

            let total_price = item.price.checked_mul(quantity).ok_or_else(|| {
                StoreError::Validation("Purchase total is too large".to_string())
            })?;

            let changed = tx.execute(
                "UPDATE marketplace_items SET stock = stock - ?1 WHERE id = ?2 AND stock >= ?1",
                params![quantity, item_id],
            )?;
            if changed == 0 {
                return Err(StoreError::InsufficientStock {
                    requested: quantity,
                    available: item.stock,
                });
            }

            let payment = NewTransaction::burn(
                item.school_id,
                student_id,
                total_price,
                TransactionType::Purchase,
            )
            .reference(item.id)
            .description(format!("{} x{}", item.name, quantity));
            let transaction = apply_transaction(tx, &payment)?;

            tx.execute(
                "INSERT INTO marketplace_purchases
                    (item_id, student_id, quantity, total_price, transaction_id, purchased_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    item_id,
                    student_id,
                    quantity,
                    total_price,
                    transaction.id,
                    Utc::now()
                ],
            )?;
            let purchase = load_purchase(tx, tx.last_insert_rowid())?;

            Ok(PurchaseReceipt {
                purchase,
                transaction,
                item: load_item(tx, item_id)?,
            })
        })?;

        tracing::info!(
            purchase_id = receipt.purchase.id,
            student_id,
            item_id,
            quantity,
            total = receipt.purchase.total_price,
            remaining_stock = receipt.item.stock,
            "Item purchased"
        );
        Ok(receipt)
    }

    /// Purchases made by one student, newest first
    pub fn list_purchases(&self, student_id: i64) -> StoreResult<Vec<MarketplacePurchase>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM marketplace_purchases WHERE student_id = ?1 ORDER BY id DESC",
                PURCHASE_COLUMNS
            ))?;
            let purchases = stmt
                .query_map(params![student_id], purchase_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(purchases)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::profiles::tests::add_profile;
    use crate::store::schools::tests::new_school;
    use crate::store::types::Role;
    use std::sync::Arc;
    use std::thread;

    fn setup(stock: i64) -> (Store, i64, i64, MarketplaceItem) {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let ada = add_profile(&store, Some(school.id), "Ada", Role::Student);
        store.adjust_balance(school.id, ada.id, 100, None).unwrap();

        let snacks = store.create_category(school.id, "Snacks").unwrap();
        let item = store
            .create_item(NewItem {
                school_id: school.id,
                category_id: Some(snacks.id),
                name: "Granola bar".to_string(),
                description: None,
                price: 15,
                stock,
            })
            .unwrap();
        (store, school.id, ada.id, item)
    }

    #[test]
    fn test_purchase_updates_stock_balance_and_supply() {
        let (store, school_id, ada, item) = setup(5);

        let receipt = store.purchase_item(ada, item.id, 2).unwrap();
        assert_eq!(receipt.purchase.total_price, 30);
        assert_eq!(receipt.transaction.amount, 30);
        assert_eq!(receipt.transaction.receiver_id, None);
        assert_eq!(receipt.item.stock, 3);
        assert_eq!(store.get_profile(ada).unwrap().coin_balance, 70);
        assert_eq!(store.get_school(school_id).unwrap().current_supply, 70);
        assert_eq!(store.list_purchases(ada).unwrap().len(), 1);
    }

    #[test]
    fn test_insufficient_stock() {
        let (store, _, ada, item) = setup(1);

        let err = store.purchase_item(ada, item.id, 2).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock {
                requested: 2,
                available: 1
            }
        ));
        assert_eq!(store.get_item(item.id).unwrap().stock, 1);
        assert_eq!(store.get_profile(ada).unwrap().coin_balance, 100);
    }

    #[test]
    fn test_insufficient_balance_restores_stock() {
        let (store, _, ada, item) = setup(10);

        let err = store.purchase_item(ada, item.id, 7).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientBalance { .. }));
        assert_eq!(store.get_item(item.id).unwrap().stock, 10);
        assert!(store.list_purchases(ada).unwrap().is_empty());
    }

    #[test]
    fn test_inactive_item_not_for_sale() {
        let (store, school_id, ada, item) = setup(3);
        store
            .update_item(
                item.id,
                ItemUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(store.purchase_item(ada, item.id, 1).is_err());
        let active = ItemFilter {
            active_only: true,
            ..Default::default()
        };
        assert!(store.list_items(school_id, &active).unwrap().is_empty());
        assert_eq!(
            store
                .list_items(school_id, &ItemFilter::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_item_validation() {
        let (store, school_id, _, item) = setup(3);
        let bad = NewItem {
            school_id,
            category_id: None,
            name: "Free lunch".to_string(),
            description: None,
            price: 0,
            stock: 1,
        };
        assert!(store.create_item(bad).is_err());

        let negative = ItemUpdate {
            stock: Some(-1),
            ..Default::default()
        };
        assert!(store.update_item(item.id, negative).is_err());
    }

    #[test]
    fn test_concurrent_purchases_never_oversell() {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let item = store
            .create_item(NewItem {
                school_id: school.id,
                category_id: None,
                name: "Sticker".to_string(),
                description: None,
                price: 1,
                stock: 5,
            })
            .unwrap();

        let students: Vec<i64> = (0..6)
            .map(|i| {
                let s = add_profile(&store, Some(school.id), &format!("Student {}", i), Role::Student);
                store.adjust_balance(school.id, s.id, 10, None).unwrap();
                s.id
            })
            .collect();

        let store = Arc::new(store);
        let handles: Vec<_> = students
            .iter()
            .map(|&student| {
                let store = Arc::clone(&store);
                let item_id = item.id;
                thread::spawn(move || {
                    (0..3)
                        .filter(|_| store.purchase_item(student, item_id, 1).is_ok())
                        .count()
                })
            })
            .collect();
        let sold: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(sold, 5);
        assert_eq!(store.get_item(item.id).unwrap().stock, 0);
        assert!(store.reconcile(school.id, false).unwrap().is_consistent());
    }
}
