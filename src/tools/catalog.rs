//! In-memory product catalog provider.
//!
//! Backs the `search_products` tool with a small static catalog so the
//! assistant can be exercised end to end without a live storefront. A
//! failed lookup is retried with broadened search terms (generic names for
//! known brands, single-token fallbacks, common pack sizes) before giving
//! up, so colloquial queries still land.

use crate::error::Result;
use crate::tools::{CapabilityProvider, ToolDeclaration};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

/// Maximum broadened search terms tried per query.
const MAX_ATTEMPTS: usize = 5;

/// Brand and colloquial names mapped to generic catalog terms.
const GENERIC_TERMS: &[(&str, &[&str])] = &[
    ("maggi", &["instant noodles", "noodles", "masala noodles"]),
    ("lays", &["chips", "potato chips"]),
    ("kurkure", &["namkeen", "snacks"]),
    ("parle g", &["biscuits", "glucose biscuits"]),
    ("oreo", &["biscuits", "cream biscuits"]),
    ("doodh", &["milk", "toned milk"]),
    ("chai", &["tea", "tea leaves"]),
    ("atta", &["wheat flour", "flour"]),
    ("chawal", &["rice", "basmati rice"]),
];

/// Quantity tokens whose presence means the query already names a pack size.
const QUANTITY_TOKENS: &[&str] = &["pack", "kg", "gm", "g", "ltr", "l", "ml"];

/// One catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogItem {
    pub name: String,
    pub brand: String,
    /// Price in the smallest display unit (rupees).
    pub price: f64,
    pub weight: String,
}

/// `search_products` provider over a static in-memory catalog.
pub struct CatalogProvider {
    items: Vec<CatalogItem>,
}

impl CatalogProvider {
    /// Create a provider over the given items.
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }

    /// A small demo catalog of everyday groceries.
    pub fn with_demo_catalog() -> Self {
        let entry = |name: &str, brand: &str, price: f64, weight: &str| CatalogItem {
            name: name.to_owned(),
            brand: brand.to_owned(),
            price,
            weight: weight.to_owned(),
        };
        Self::new(vec![
            entry("Toned Milk", "Amul", 27.0, "500ml"),
            entry("Toned Milk", "Mother Dairy", 26.0, "500ml"),
            entry("Full Cream Milk", "Amul", 33.0, "500ml"),
            entry("White Bread", "Harvest Gold", 45.0, "400g"),
            entry("Brown Bread", "Britannia", 50.0, "400g"),
            entry("Instant Noodles", "Maggi", 14.0, "70g"),
            entry("Masala Noodles", "Yippee", 13.0, "65g"),
            entry("Potato Chips", "Lays", 20.0, "52g"),
            entry("Glucose Biscuits", "Parle", 10.0, "80g"),
            entry("Cream Biscuits", "Oreo", 30.0, "120g"),
            entry("Tea Leaves", "Tata Tea", 140.0, "250g"),
            entry("Wheat Flour", "Aashirvaad", 325.0, "5kg"),
            entry("Basmati Rice", "India Gate", 550.0, "5kg"),
            entry("Salted Butter", "Amul", 60.0, "100g"),
            entry("Curd", "Mother Dairy", 35.0, "400g"),
        ])
    }

    /// Substring match on name and brand, case-insensitive.
    fn search(&self, term: &str) -> Vec<&CatalogItem> {
        let needle = term.to_lowercase();
        self.items
            .iter()
            .filter(|item| {
                item.name.to_lowercase().contains(&needle)
                    || item.brand.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Broadened search terms for `query`, most specific first.
    fn alternatives(query: &str) -> Vec<String> {
        let mut terms = vec![query.to_owned()];
        let query_lower = query.to_lowercase();

        for (brand, generics) in GENERIC_TERMS {
            if query_lower.contains(brand) {
                terms.extend(generics.iter().map(|t| (*t).to_owned()));
                break;
            }
        }

        let words: Vec<&str> = query.split_whitespace().collect();
        if words.len() > 1 {
            terms.push(words[0].to_owned());
            terms.push(words[words.len() - 1].to_owned());
        }

        let has_quantity = query_lower.split_whitespace().any(|w| {
            let stripped = w.trim_start_matches(|c: char| c.is_ascii_digit());
            QUANTITY_TOKENS.contains(&stripped)
        });
        if !has_quantity {
            terms.push(format!("{query} 1kg"));
            terms.push(format!("{query} 500g"));
        }

        let mut seen = Vec::new();
        let mut unique = Vec::new();
        for term in terms {
            let key = term.to_lowercase();
            let trimmed = key.trim();
            if trimmed.is_empty() || seen.contains(&key) {
                continue;
            }
            seen.push(key.clone());
            unique.push(term);
        }
        unique.truncate(MAX_ATTEMPTS);
        unique
    }
}

#[async_trait]
impl CapabilityProvider for CatalogProvider {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: "search_products".to_owned(),
            description: "Search the grocery catalog for a product. Call this \
                          immediately when the user asks for any product; it \
                          returns current prices and availability."
                .to_owned(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Product name to search for, e.g. 'toned milk 1 liter'",
                    },
                },
                "required": ["query"],
            }),
        }
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        if query.is_empty() {
            return Err(crate::error::VoiceError::Tool(
                "search_products requires a non-empty 'query'".to_owned(),
            ));
        }

        for term in Self::alternatives(&query) {
            let hits = self.search(&term);
            if hits.is_empty() {
                debug!("no results for '{term}', broadening");
                continue;
            }

            let cheapest = hits
                .iter()
                .min_by(|a, b| a.price.total_cmp(&b.price))
                .map(|item| serde_json::json!({ "name": item.name, "price": item.price }));

            return Ok(serde_json::json!({
                "status": "found",
                "query": query,
                "search_term_used": term,
                "products": hits,
                "cheapest": cheapest,
            }));
        }

        Ok(serde_json::json!({
            "status": "not_found",
            "query": query,
            "message": format!("No products found for '{query}' after trying broader search terms."),
        }))
    }
}
