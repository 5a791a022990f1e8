//! Credit package catalog.
//!
//! Checkout sessions carry either an explicit credit count or a package id;
//! the webhook resolves package ids against this catalog.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// A purchasable bundle of credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPackage {
    /// Stable id used in checkout metadata.
    pub id: String,
    /// Display name, used in transaction descriptions.
    pub name: String,
    /// Credits granted on payment.
    pub credits: i64,
    /// Price in cents (USD).
    pub price_cents: i64,
}

/// The set of packages on sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageCatalog {
    packages: Vec<CreditPackage>,
}

impl Default for PackageCatalog {
    fn default() -> Self {
        let package = |id: &str, name: &str, credits, price_cents| CreditPackage {
            id: id.to_string(),
            name: name.to_string(),
            credits,
            price_cents,
        };

        Self {
            packages: vec![
                package("starter", "Starter Pack", 10, 299),
                package("standard", "Standard Pack", 20, 499),
                package("premium", "Premium Pack", 50, 999),
                package("ultimate", "Ultimate Pack", 100, 1799),
            ],
        }
    }
}

impl PackageCatalog {
    /// Build a catalog from an explicit list.
    #[must_use]
    pub fn new(packages: Vec<CreditPackage>) -> Self {
        Self { packages }
    }

    /// All packages, cheapest first.
    #[must_use]
    pub fn packages(&self) -> &[CreditPackage] {
        &self.packages
    }

    /// Look up a package by id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownPackage`] if no package has that id.
    pub fn get(&self, id: &str) -> Result<&CreditPackage> {
        self.packages
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| LedgerError::UnknownPackage(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_lookup() {
        let catalog = PackageCatalog::default();
        let standard = catalog.get("standard").unwrap();
        assert_eq!(standard.credits, 20);
        assert_eq!(standard.name, "Standard Pack");
        assert_eq!(catalog.packages().len(), 4);
    }

    #[test]
    fn unknown_package_is_an_error() {
        let catalog = PackageCatalog::default();
        assert_eq!(
            catalog.get("mega").unwrap_err(),
            LedgerError::UnknownPackage("mega".into())
        );
    }
}
