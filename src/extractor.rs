use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Structured result of a successful page extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeResult {
    pub title: String,
    pub price: Decimal,
}

/// Ordered price selector list. The order is a contract: when a page
/// exposes several price elements at once, the earliest match wins
/// (deal price beats the generic offscreen price).
const PRICE_SELECTORS: &[(&str, &str)] = &[
    ("deal_price", "span#priceblock_dealprice"),
    ("list_price", "span#priceblock_ourprice"),
    ("buybox_price", "span#price_inside_buybox"),
    ("whole_price", "span.a-price-whole"),
    ("offscreen_price", "span.a-offscreen"),
];

const TITLE_SELECTOR: &str = "span#productTitle";

pub struct PriceExtractor {
    title_selector: Selector,
    price_selectors: Vec<(&'static str, Selector)>,
}

impl PriceExtractor {
    pub fn new() -> Self {
        Self {
            title_selector: Selector::parse(TITLE_SELECTOR).unwrap(),
            price_selectors: PRICE_SELECTORS
                .iter()
                .map(|(label, css)| (*label, Selector::parse(css).unwrap()))
                .collect(),
        }
    }

    /// Parse a product page into title and price.
    ///
    /// Returns `None` when the title element is missing or no selector in
    /// the priority list yields a parsable price.
    pub fn extract(&self, html: &str) -> Option<ScrapeResult> {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.title_selector)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())?;

        for (label, selector) in &self.price_selectors {
            let Some(element) = document.select(selector).next() else {
                continue;
            };
            // Unparsable text falls through to the next selector
            if let Some(price) = normalize_price(&element_text(element)) {
                tracing::trace!(selector = label, %price, "price selector matched");
                return Some(ScrapeResult { title, price });
            }
        }

        None
    }
}

impl Default for PriceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn element_text(element: scraper::ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// Normalize a raw price string to a decimal: strip thousands separators
/// and currency symbols, then parse the first whitespace-separated token.
pub fn normalize_price(text: &str) -> Option<Decimal> {
    let cleaned = text.replace(',', "").replace('₹', "").replace('$', "");
    let token = cleaned.split_whitespace().next()?;
    Decimal::from_str(token).ok().filter(|p| !p.is_sign_negative())
}
