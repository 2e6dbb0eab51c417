//! Offer graph construction errors.

use thiserror::Error;

use crate::{
    catalog::{ItemId, VendorId},
    rules::RuleError,
};

/// Errors that can occur when building an offer graph from a snapshot.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// The same item id appears on more than one requested line.
    #[error("item {0} is requested more than once")]
    DuplicateItem(ItemId),

    /// An offer's currency differs from the snapshot currency.
    #[error("offer for {item} at {vendor} is priced in {found}, snapshot uses {expected}")]
    CurrencyMismatch {
        /// Item on the offending offer.
        item: ItemId,

        /// Vendor on the offending offer.
        vendor: VendorId,

        /// ISO code found on the offer.
        found: &'static str,

        /// ISO code of the snapshot currency.
        expected: &'static str,
    },

    /// A percentage rule could not be applied to a unit price.
    #[error(transparent)]
    Rule(#[from] RuleError),
}
