//! Catalog identifiers and requested item lines.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id! {
    /// Identifier of a requested product line.
    ItemId
}

string_id! {
    /// Identifier of a sellable vendor location.
    VendorId
}

string_id! {
    /// Identifier of a discount rule.
    RuleId
}

string_id! {
    /// Identifier of a shopper.
    UserId
}

string_id! {
    /// Canonical product category (for example `dairy` or `produce`).
    Category
}

/// One requested product line, immutable for the lifetime of a planning request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedItem {
    /// Requested item id.
    #[serde(rename = "item_id")]
    pub item: ItemId,

    /// The item's canonical category. Offer rows disagreeing with it are
    /// ignored, so a miscategorised snapshot row cannot reclassify the item.
    pub category: Category,

    /// Requested quantity in units.
    pub qty: u32,
}

impl RequestedItem {
    /// Create a requested line.
    #[must_use]
    pub fn new(item: impl Into<ItemId>, category: impl Into<Category>, qty: u32) -> Self {
        Self {
            item: item.into(),
            category: category.into(),
            qty,
        }
    }
}
