//! Peer-to-peer exchange listings and offers
//!
//! Students list skills or services for coins. Buyers make offers; when the
//! seller accepts one, the coins move buyer to seller, the other pending
//! offers are rejected and the listing closes, all in one SQLite transaction.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::store::database::Store;
use crate::store::error::{StoreError, StoreResult};
use crate::store::ledger::apply_transaction;
use crate::store::profiles::{load_member, load_profile};
use crate::store::types::{
    ExchangeListing, ExchangeOffer, ListingStatus, NewTransaction, OfferStatus, Transaction,
};

const LISTING_COLUMNS: &str = "id, school_id, seller_id, title, description, price, status, created_at";
const OFFER_COLUMNS: &str =
    "id, listing_id, buyer_id, amount, message, status, transaction_id, created_at";

/// Fields for creating a listing
#[derive(Debug, Clone, Deserialize)]
pub struct NewListing {
    pub seller_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: i64,
}

/// Fields for making an offer
#[derive(Debug, Clone, Deserialize)]
pub struct NewOffer {
    pub listing_id: i64,
    pub buyer_id: i64,
    pub amount: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of accepting an offer
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedOffer {
    pub listing: ExchangeListing,
    pub offer: ExchangeOffer,
    pub transaction: Transaction,
    /// Other offers on the listing that were rejected
    pub rejected_offers: usize,
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<ExchangeListing> {
    Ok(ExchangeListing {
        id: row.get("id")?,
        school_id: row.get("school_id")?,
        seller_id: row.get("seller_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        price: row.get("price")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
    })
}

fn offer_from_row(row: &Row<'_>) -> rusqlite::Result<ExchangeOffer> {
    Ok(ExchangeOffer {
        id: row.get("id")?,
        listing_id: row.get("listing_id")?,
        buyer_id: row.get("buyer_id")?,
        amount: row.get("amount")?,
        message: row.get("message")?,
        status: row.get("status")?,
        transaction_id: row.get("transaction_id")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn load_listing(conn: &Connection, id: i64) -> StoreResult<ExchangeListing> {
    conn.query_row(
        &format!("SELECT {} FROM exchange_listings WHERE id = ?1", LISTING_COLUMNS),
        params![id],
        listing_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Listing", id))
}

pub(crate) fn load_offer(conn: &Connection, id: i64) -> StoreResult<ExchangeOffer> {
    conn.query_row(
        &format!("SELECT {} FROM exchange_offers WHERE id = ?1", OFFER_COLUMNS),
        params![id],
        offer_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("Offer", id))
}

fn require_open(listing: &ExchangeListing) -> StoreResult<()> {
    if listing.status != ListingStatus::Open {
        return Err(StoreError::Conflict(format!(
            "Listing {} is {}",
            listing.id, listing.status
        )));
    }
    Ok(())
}

/// Move a pending offer to `status`; fails if it was already settled
fn settle_offer(conn: &Connection, offer_id: i64, status: OfferStatus) -> StoreResult<ExchangeOffer> {
    let changed = conn.execute(
        "UPDATE exchange_offers SET status = ?1 WHERE id = ?2 AND status = ?3",
        params![status, offer_id, OfferStatus::Pending],
    )?;
    if changed == 0 {
        let offer = load_offer(conn, offer_id)?;
        return Err(StoreError::Conflict(format!(
            "Offer {} is already {}",
            offer_id, offer.status
        )));
    }
    load_offer(conn, offer_id)
}

fn reject_pending(conn: &Connection, listing_id: i64) -> StoreResult<usize> {
    let rejected = conn.execute(
        "UPDATE exchange_offers SET status = ?1 WHERE listing_id = ?2 AND status = ?3",
        params![OfferStatus::Rejected, listing_id, OfferStatus::Pending],
    )?;
    Ok(rejected)
}

impl Store {
    // ==================== Listings ====================

    /// Open a listing in the seller's school
    pub fn create_listing(&self, new: NewListing) -> StoreResult<ExchangeListing> {
        if new.title.trim().is_empty() {
            return Err(StoreError::Validation("Title cannot be empty".to_string()));
        }
        if new.price <= 0 {
            return Err(StoreError::Validation(
                "Price must be greater than zero".to_string(),
            ));
        }

        let listing = self.with_tx(|tx| {
            let seller = load_profile(tx, new.seller_id)?;
            let school_id = seller.school_id.ok_or_else(|| {
                StoreError::Validation("Profile is not attached to a school".to_string())
            })?;

            tx.execute(
                "INSERT INTO exchange_listings (school_id, seller_id, title, description, price, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    school_id,
                    seller.id,
                    new.title.trim(),
                    new.description,
                    new.price,
                    ListingStatus::Open,
                    Utc::now()
                ],
            )?;
            load_listing(tx, tx.last_insert_rowid())
        })?;

        tracing::info!(listing_id = listing.id, seller_id = listing.seller_id, price = listing.price, "Opened listing");
        Ok(listing)
    }

    pub fn get_listing(&self, id: i64) -> StoreResult<ExchangeListing> {
        self.with_conn(|conn| load_listing(conn, id))
    }

    /// Listings of a school, newest first
    pub fn list_listings(
        &self,
        school_id: i64,
        status: Option<ListingStatus>,
    ) -> StoreResult<Vec<ExchangeListing>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM exchange_listings
                 WHERE school_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY id DESC",
                LISTING_COLUMNS
            ))?;
            let listings = stmt
                .query_map(params![school_id, status], listing_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(listings)
        })
    }

    /// Cancel an open listing and reject its pending offers
    pub fn cancel_listing(&self, id: i64) -> StoreResult<ExchangeListing> {
        self.with_tx(|tx| {
            let listing = load_listing(tx, id)?;
            require_open(&listing)?;

            tx.execute(
                "UPDATE exchange_listings SET status = ?1 WHERE id = ?2",
                params![ListingStatus::Cancelled, id],
            )?;
            let rejected = reject_pending(tx, id)?;
            tracing::info!(listing_id = id, rejected, "Cancelled listing");
            load_listing(tx, id)
        })
    }

    // ==================== Offers ====================

    /// Bid on an open listing
    ///
    /// The buyer must be in the listing's school and cannot bid on their own
    /// listing. Balance is checked when the offer is accepted, not here.
    pub fn make_offer(&self, new: NewOffer) -> StoreResult<ExchangeOffer> {
        if new.amount <= 0 {
            return Err(StoreError::Validation(
                "Offer amount must be greater than zero".to_string(),
            ));
        }

        self.with_tx(|tx| {
            let listing = load_listing(tx, new.listing_id)?;
            require_open(&listing)?;
            if listing.seller_id == new.buyer_id {
                return Err(StoreError::Validation(
                    "Cannot make an offer on your own listing".to_string(),
                ));
            }
            load_member(tx, new.buyer_id, listing.school_id)?;

            let pending: i64 = tx.query_row(
                "SELECT COUNT(*) FROM exchange_offers WHERE listing_id = ?1 AND buyer_id = ?2 AND status = ?3",
                params![listing.id, new.buyer_id, OfferStatus::Pending],
                |row| row.get(0),
            )?;
            if pending > 0 {
                return Err(StoreError::Conflict(
                    "You already have a pending offer on this listing".to_string(),
                ));
            }

            tx.execute(
                "INSERT INTO exchange_offers (listing_id, buyer_id, amount, message, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    listing.id,
                    new.buyer_id,
                    new.amount,
                    new.message,
                    OfferStatus::Pending,
                    Utc::now()
                ],
            )?;
            load_offer(tx, tx.last_insert_rowid())
        })
    }

    pub fn get_offer(&self, id: i64) -> StoreResult<ExchangeOffer> {
        self.with_conn(|conn| load_offer(conn, id))
    }

    /// Offers on a listing, oldest first
    pub fn list_offers(&self, listing_id: i64) -> StoreResult<Vec<ExchangeOffer>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM exchange_offers WHERE listing_id = ?1 ORDER BY id",
                OFFER_COLUMNS
            ))?;
            let offers = stmt
                .query_map(params![listing_id], offer_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(offers)
        })
    }

    /// Offers a buyer has made, newest first
    pub fn list_buyer_offers(&self, buyer_id: i64) -> StoreResult<Vec<ExchangeOffer>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM exchange_offers WHERE buyer_id = ?1 ORDER BY id DESC",
                OFFER_COLUMNS
            ))?;
            let offers = stmt
                .query_map(params![buyer_id], offer_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(offers)
        })
    }

    /// Accept an offer: pay the seller, close the listing
    pub fn accept_offer(&self, offer_id: i64) -> StoreResult<AcceptedOffer> {
        let accepted = self.with_tx(|tx| {
            let offer = load_offer(tx, offer_id)?;
            let listing = load_listing(tx, offer.listing_id)?;
            require_open(&listing)?;

            settle_offer(tx, offer_id, OfferStatus::Accepted)?;

            let payment = NewTransaction::transfer(
                listing.school_id,
                offer.buyer_id,
                listing.seller_id,
                offer.amount,
            )
            .reference(listing.id)
            .description(format!("Exchange: {}", listing.title));
            let transaction = apply_transaction(tx, &payment)?;

            tx.execute(
                "UPDATE exchange_offers SET transaction_id = ?1 WHERE id = ?2",
                params![transaction.id, offer_id],
            )?;
            let rejected_offers = reject_pending(tx, listing.id)?;
            tx.execute(
                "UPDATE exchange_listings SET status = ?1 WHERE id = ?2",
                params![ListingStatus::Closed, listing.id],
            )?;

            Ok(AcceptedOffer {
                listing: load_listing(tx, listing.id)?,
                offer: load_offer(tx, offer_id)?,
                transaction,
                rejected_offers,
            })
        })?;

        tracing::info!(
            listing_id = accepted.listing.id,
            offer_id,
            amount = accepted.transaction.amount,
            rejected = accepted.rejected_offers,
            "Accepted offer"
        );
        Ok(accepted)
    }

    /// Seller turns down a pending offer
    pub fn reject_offer(&self, offer_id: i64) -> StoreResult<ExchangeOffer> {
        self.with_tx(|tx| settle_offer(tx, offer_id, OfferStatus::Rejected))
    }

    /// Buyer takes back a pending offer
    pub fn withdraw_offer(&self, offer_id: i64) -> StoreResult<ExchangeOffer> {
        self.with_tx(|tx| settle_offer(tx, offer_id, OfferStatus::Withdrawn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::profiles::tests::add_profile;
    use crate::store::schools::tests::new_school;
    use crate::store::types::Role;

    struct Fixture {
        store: Store,
        school_id: i64,
        seller: i64,
        buyer: i64,
        other: i64,
        listing: ExchangeListing,
    }

    fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let school = store.create_school(new_school(None)).unwrap();
        let seller = add_profile(&store, Some(school.id), "Sam Seller", Role::Student).id;
        let buyer = add_profile(&store, Some(school.id), "Bea Buyer", Role::Student).id;
        let other = add_profile(&store, Some(school.id), "Otto", Role::Student).id;
        for id in [buyer, other] {
            store.adjust_balance(school.id, id, 50, None).unwrap();
        }

        let listing = store
            .create_listing(NewListing {
                seller_id: seller,
                title: "Math tutoring".to_string(),
                description: Some("One hour".to_string()),
                price: 20,
            })
            .unwrap();

        Fixture {
            store,
            school_id: school.id,
            seller,
            buyer,
            other,
            listing,
        }
    }

    fn offer(f: &Fixture, buyer_id: i64, amount: i64) -> ExchangeOffer {
        f.store
            .make_offer(NewOffer {
                listing_id: f.listing.id,
                buyer_id,
                amount,
                message: None,
            })
            .unwrap()
    }

    #[test]
    fn test_accept_offer_pays_seller_and_closes_listing() {
        let f = fixture();
        let winning = offer(&f, f.buyer, 18);
        let losing = offer(&f, f.other, 15);

        let accepted = f.store.accept_offer(winning.id).unwrap();
        assert_eq!(accepted.listing.status, ListingStatus::Closed);
        assert_eq!(accepted.offer.status, OfferStatus::Accepted);
        assert_eq!(accepted.offer.transaction_id, Some(accepted.transaction.id));
        assert_eq!(accepted.transaction.reference_id, Some(f.listing.id));
        assert_eq!(accepted.rejected_offers, 1);

        assert_eq!(f.store.get_profile(f.buyer).unwrap().coin_balance, 32);
        assert_eq!(f.store.get_profile(f.seller).unwrap().coin_balance, 18);
        assert_eq!(
            f.store.get_offer(losing.id).unwrap().status,
            OfferStatus::Rejected
        );
        assert!(f.store.reconcile(f.school_id, false).unwrap().is_consistent());
    }

    #[test]
    fn test_accept_without_funds_changes_nothing() {
        let f = fixture();
        let greedy = offer(&f, f.buyer, 80);

        let err = f.store.accept_offer(greedy.id).unwrap_err();
        assert!(matches!(err, StoreError::InsufficientBalance { .. }));
        assert_eq!(
            f.store.get_offer(greedy.id).unwrap().status,
            OfferStatus::Pending
        );
        assert_eq!(
            f.store.get_listing(f.listing.id).unwrap().status,
            ListingStatus::Open
        );
    }

    #[test]
    fn test_offer_rules() {
        let f = fixture();
        let own = f.store.make_offer(NewOffer {
            listing_id: f.listing.id,
            buyer_id: f.seller,
            amount: 5,
            message: None,
        });
        assert!(matches!(own, Err(StoreError::Validation(_))));

        offer(&f, f.buyer, 10);
        let duplicate = f.store.make_offer(NewOffer {
            listing_id: f.listing.id,
            buyer_id: f.buyer,
            amount: 12,
            message: None,
        });
        assert!(matches!(duplicate, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_withdraw_and_reject_are_final() {
        let f = fixture();
        let first = offer(&f, f.buyer, 10);
        let second = offer(&f, f.other, 12);

        assert_eq!(
            f.store.withdraw_offer(first.id).unwrap().status,
            OfferStatus::Withdrawn
        );
        assert_eq!(
            f.store.reject_offer(second.id).unwrap().status,
            OfferStatus::Rejected
        );
        assert!(matches!(
            f.store.accept_offer(first.id),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_cancel_listing_rejects_offers() {
        let f = fixture();
        let pending = offer(&f, f.buyer, 10);

        let cancelled = f.store.cancel_listing(f.listing.id).unwrap();
        assert_eq!(cancelled.status, ListingStatus::Cancelled);
        assert_eq!(
            f.store.get_offer(pending.id).unwrap().status,
            OfferStatus::Rejected
        );
        assert!(f.store.cancel_listing(f.listing.id).is_err());

        let open = f
            .store
            .list_listings(f.school_id, Some(ListingStatus::Open))
            .unwrap();
        assert!(open.is_empty());
    }
}
