//! Catalog read model.
//!
//! The fulfillment core only reads the catalog: it checks that a product (and
//! variant) exists and can be sold, then snapshots name, SKU and price into the
//! order line. Catalog management lives elsewhere.

pub mod product;

pub use product::{
    LineSnapshot, PricingMetadata, Product, ProductId, ProductStatus, ProductVariant, VariantId,
};
