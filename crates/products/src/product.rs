use serde::{Deserialize, Serialize};

use storekeep_core::{DomainError, DomainResult, Entity, aggregate_id};

aggregate_id!(
    /// Product identifier.
    ProductId
);

aggregate_id!(
    /// Product variant identifier (size, colour, ...).
    VariantId
);

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// Pricing in the smallest currency unit (e.g. cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingMetadata {
    pub base_price: i64,
    pub currency: String,
}

/// Catalog product as seen by fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    status: ProductStatus,
    pricing: PricingMetadata,
}

/// A sellable variant of a product; may override the product price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    id: VariantId,
    product_id: ProductId,
    sku: String,
    name: String,
    price_override: Option<i64>,
    active: bool,
}

/// Name/SKU/price frozen onto an order line at the time of ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub product_name: String,
    pub sku: String,
    pub unit_price: i64,
}

impl Product {
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        status: ProductStatus,
        pricing: PricingMetadata,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if pricing.base_price < 0 {
            return Err(DomainError::validation("base_price cannot be negative"));
        }
        Ok(Self {
            id,
            sku,
            name,
            status,
            pricing,
        })
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn pricing(&self) -> &PricingMetadata {
        &self.pricing
    }

    /// Check if product can be sold (must be Active, not Draft or Archived).
    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::Active
    }

    /// Snapshot this product (or one of its variants) for an order line.
    pub fn snapshot(&self, variant: Option<&ProductVariant>) -> DomainResult<LineSnapshot> {
        if !self.can_be_sold() {
            return Err(DomainError::validation(format!(
                "product {} is not available for sale",
                self.sku
            )));
        }

        match variant {
            None => Ok(LineSnapshot {
                product_id: self.id,
                variant_id: None,
                product_name: self.name.clone(),
                sku: self.sku.clone(),
                unit_price: self.pricing.base_price,
            }),
            Some(v) => {
                if v.product_id != self.id {
                    return Err(DomainError::invariant(format!(
                        "variant {} does not belong to product {}",
                        v.sku, self.sku
                    )));
                }
                if !v.active {
                    return Err(DomainError::validation(format!(
                        "variant {} is not available for sale",
                        v.sku
                    )));
                }
                Ok(LineSnapshot {
                    product_id: self.id,
                    variant_id: Some(v.id),
                    product_name: format!("{} - {}", self.name, v.name),
                    sku: v.sku.clone(),
                    unit_price: v.price_override.unwrap_or(self.pricing.base_price),
                })
            }
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ProductVariant {
    pub fn new(
        id: VariantId,
        product_id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        price_override: Option<i64>,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("variant sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("variant name cannot be empty"));
        }
        if matches!(price_override, Some(p) if p < 0) {
            return Err(DomainError::validation("variant price cannot be negative"));
        }
        Ok(Self {
            id,
            product_id,
            sku,
            name,
            price_override,
            active: true,
        })
    }

    pub fn id_typed(&self) -> VariantId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

impl Entity for ProductVariant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing(base_price: i64) -> PricingMetadata {
        PricingMetadata {
            base_price,
            currency: "USD".to_string(),
        }
    }

    fn active_product() -> Product {
        Product::new(
            ProductId::generate(),
            "TSHIRT",
            "T-Shirt",
            ProductStatus::Active,
            pricing(1500),
        )
        .unwrap()
    }

    #[test]
    fn snapshot_without_variant_uses_product_fields() {
        let product = active_product();
        let snap = product.snapshot(None).unwrap();
        assert_eq!(snap.product_name, "T-Shirt");
        assert_eq!(snap.sku, "TSHIRT");
        assert_eq!(snap.unit_price, 1500);
        assert_eq!(snap.variant_id, None);
    }

    #[test]
    fn snapshot_with_variant_prefers_variant_price_and_sku() {
        let product = active_product();
        let variant = ProductVariant::new(
            VariantId::generate(),
            product.id_typed(),
            "TSHIRT-XL",
            "XL",
            Some(1800),
        )
        .unwrap();

        let snap = product.snapshot(Some(&variant)).unwrap();
        assert_eq!(snap.product_name, "T-Shirt - XL");
        assert_eq!(snap.sku, "TSHIRT-XL");
        assert_eq!(snap.unit_price, 1800);
        assert_eq!(snap.variant_id, Some(variant.id_typed()));
    }

    #[test]
    fn snapshot_rejects_foreign_variant() {
        let product = active_product();
        let variant =
            ProductVariant::new(VariantId::generate(), ProductId::generate(), "X", "X", None)
                .unwrap();
        let err = product.snapshot(Some(&variant)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn archived_products_cannot_be_snapshotted() {
        let product = Product::new(
            ProductId::generate(),
            "OLD",
            "Old",
            ProductStatus::Archived,
            pricing(100),
        )
        .unwrap();
        assert!(!product.can_be_sold());
        assert!(matches!(
            product.snapshot(None),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn inactive_variant_cannot_be_snapshotted() {
        let product = active_product();
        let variant = ProductVariant::new(
            VariantId::generate(),
            product.id_typed(),
            "TSHIRT-S",
            "S",
            None,
        )
        .unwrap()
        .deactivated();
        assert!(product.snapshot(Some(&variant)).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: a variant without override always inherits the base price.
            #[test]
            fn variant_without_override_inherits_base_price(
                base in 0i64..10_000_000,
                sku in "[A-Z0-9]{1,20}",
            ) {
                let product = Product::new(
                    ProductId::generate(),
                    sku.clone(),
                    "Item",
                    ProductStatus::Active,
                    pricing(base),
                ).unwrap();
                let variant = ProductVariant::new(
                    VariantId::generate(),
                    product.id_typed(),
                    format!("{sku}-V"),
                    "V",
                    None,
                ).unwrap();

                let snap = product.snapshot(Some(&variant)).unwrap();
                prop_assert_eq!(snap.unit_price, base);
            }
        }
    }
}
