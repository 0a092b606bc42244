//! Allow-list of device products eligible for provisioning
//!
//! Loaded once from `devices.conf` at startup and shared read-only between
//! attempts. File format: one product identifier per line, blank lines and
//! `//` comments ignored, trailing `//` comments stripped.

use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Ordered, de-duplicated set of product identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    products: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for product in products {
            list.insert(product.into());
        }
        list
    }

    /// Parse the contents of a `devices.conf` file
    ///
    /// # Example
    /// ```
    /// use provisioner::AllowList;
    ///
    /// let list = AllowList::parse("foo // comment\n// fullcomment\n\nbar\n");
    /// assert_eq!(list.products(), ["foo", "bar"]);
    /// ```
    pub fn parse(content: &str) -> Self {
        let mut list = Self::default();

        for line in content.lines() {
            let entry = match line.find("//") {
                Some(idx) => &line[..idx],
                None => line,
            };
            let entry = entry.trim();
            if !entry.is_empty() {
                list.insert(entry.to_string());
            }
        }

        list
    }

    /// Load the allow-list from `path`
    ///
    /// A missing file yields an empty list (no device will ever match) and a
    /// warning; any other read error is returned.
    pub fn load(path: &Path) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let list = Self::parse(&content);
                info!(
                    "Loaded {} allowed product(s) from {}",
                    list.len(),
                    path.display()
                );
                Ok(list)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "Allow-list {} not found, no devices will be provisioned",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    fn insert(&mut self, product: String) {
        if !self.products.contains(&product) {
            self.products.push(product);
        }
    }

    /// True if `product` is allow-listed; an empty product never matches
    pub fn contains(&self, product: &str) -> bool {
        !product.is_empty() && self.products.iter().any(|p| p == product)
    }

    pub fn products(&self) -> &[String] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}
