//! Read-only catalog lookup used to snapshot order lines.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use storekeep_orders::NewOrderLine;
use storekeep_products::{Product, ProductId, ProductVariant, VariantId};

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::store::StoreError;

/// Product/variant lookup owned by the catalog service.
pub trait Catalog: Send + Sync {
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    fn variant(&self, id: VariantId) -> Result<Option<ProductVariant>, StoreError>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).product(id)
    }

    fn variant(&self, id: VariantId) -> Result<Option<ProductVariant>, StoreError> {
        (**self).variant(id)
    }
}

/// A line as requested by the caller, before name/SKU/price are frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRequest {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
}

impl LineRequest {
    pub fn product(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            variant_id: None,
            quantity,
        }
    }

    pub fn variant(product_id: ProductId, variant_id: VariantId, quantity: i64) -> Self {
        Self {
            product_id,
            variant_id: Some(variant_id),
            quantity,
        }
    }
}

/// Resolve a requested line against the catalog.
///
/// `NotFound` when the product or variant does not exist; the product must be
/// sellable and the variant must belong to it.
pub fn snapshot_line<C: Catalog + ?Sized>(
    catalog: &C,
    request: &LineRequest,
) -> FulfillmentResult<NewOrderLine> {
    let product = catalog
        .product(request.product_id)?
        .ok_or_else(|| FulfillmentError::not_found(format!("product {}", request.product_id)))?;

    let variant = match request.variant_id {
        Some(id) => Some(
            catalog
                .variant(id)?
                .ok_or_else(|| FulfillmentError::not_found(format!("variant {id}")))?,
        ),
        None => None,
    };

    Ok(NewOrderLine {
        snapshot: product.snapshot(variant.as_ref())?,
        quantity: request.quantity,
    })
}

/// In-memory catalog (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
    variants: RwLock<HashMap<VariantId, ProductVariant>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, product: Product) -> Result<(), StoreError> {
        let mut products = self.products.write().map_err(poisoned)?;
        products.insert(product.id_typed(), product);
        Ok(())
    }

    pub fn add_variant(&self, variant: ProductVariant) -> Result<(), StoreError> {
        let mut variants = self.variants.write().map_err(poisoned)?;
        variants.insert(variant.id_typed(), variant);
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Backend("catalog lock poisoned".to_string())
}

impl Catalog for InMemoryCatalog {
    fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let products = self.products.read().map_err(poisoned)?;
        Ok(products.get(&id).cloned())
    }

    fn variant(&self, id: VariantId) -> Result<Option<ProductVariant>, StoreError> {
        let variants = self.variants.read().map_err(poisoned)?;
        Ok(variants.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storekeep_products::{PricingMetadata, ProductStatus};

    fn product(status: ProductStatus) -> Product {
        Product::new(
            ProductId::generate(),
            "TEE-001",
            "Tee",
            status,
            PricingMetadata {
                base_price: 1_500,
                currency: "USD".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn snapshot_freezes_name_sku_and_price() {
        let catalog = InMemoryCatalog::new();
        let tee = product(ProductStatus::Active);
        let id = tee.id_typed();
        catalog.add_product(tee).unwrap();

        let line = snapshot_line(&catalog, &LineRequest::product(id, 2)).unwrap();
        assert_eq!(line.quantity, 2);
        assert_eq!(line.snapshot.sku, "TEE-001");
        assert_eq!(line.snapshot.unit_price, 1_500);
    }

    #[test]
    fn variant_price_override_wins() {
        let catalog = InMemoryCatalog::new();
        let tee = product(ProductStatus::Active);
        let id = tee.id_typed();
        let large = ProductVariant::new(VariantId::generate(), id, "TEE-001-L", "Large", Some(1_800))
            .unwrap();
        let large_id = large.id_typed();
        catalog.add_product(tee).unwrap();
        catalog.add_variant(large).unwrap();

        let line = snapshot_line(&catalog, &LineRequest::variant(id, large_id, 1)).unwrap();
        assert_eq!(line.snapshot.variant_id, Some(large_id));
        assert_eq!(line.snapshot.unit_price, 1_800);
    }

    #[test]
    fn missing_product_or_variant_is_not_found() {
        let catalog = InMemoryCatalog::new();
        let err = snapshot_line(&catalog, &LineRequest::product(ProductId::generate(), 1))
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));

        let tee = product(ProductStatus::Active);
        let id = tee.id_typed();
        catalog.add_product(tee).unwrap();
        let err = snapshot_line(&catalog, &LineRequest::variant(id, VariantId::generate(), 1))
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }

    #[test]
    fn archived_products_cannot_be_ordered() {
        let catalog = InMemoryCatalog::new();
        let old = product(ProductStatus::Archived);
        let id = old.id_typed();
        catalog.add_product(old).unwrap();

        let err = snapshot_line(&catalog, &LineRequest::product(id, 1)).unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(_)));
    }
}
