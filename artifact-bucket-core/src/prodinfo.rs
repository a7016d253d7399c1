//! Product reference side-cars.
//!
//! A reference-counted artifact at `key` has a sibling plain-text object at
//! `key.prodinfo` listing one owning product per line. The side-car is always
//! rewritten in full.

use std::collections::BTreeSet;

/// Suffix of the side-car object.
pub const PRODINFO_SUFFIX: &str = ".prodinfo";

/// Key of the side-car that tracks owners of `key`.
pub fn prodinfo_key(key: &str) -> String {
    format!("{key}{PRODINFO_SUFFIX}")
}

pub fn is_prodinfo(key: &str) -> bool {
    key.ends_with(PRODINFO_SUFFIX)
}

/// The set of products currently depending on one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductReference {
    products: BTreeSet<String>,
}

impl ProductReference {
    /// Parse side-car content. Blank lines and surrounding whitespace are ignored.
    pub fn parse(content: &str) -> Self {
        Self {
            products: content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    /// Returns `true` if the product was not already an owner.
    pub fn add(&mut self, product: &str) -> bool {
        self.products.insert(product.to_string())
    }

    /// Returns `true` if the product was an owner.
    pub fn remove(&mut self, product: &str) -> bool {
        self.products.remove(product)
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn products(&self) -> impl Iterator<Item = &str> {
        self.products.iter().map(String::as_str)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.products
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
            .into_bytes()
    }
}
