//! Validation of free-text step input. Every parser returns `None` on malformed input so the
//! engine can re-prompt without touching state.

use regex::Regex;

use crate::domain::{Nutrients, ProductNames};

/// Fixed quick-increment steps offered while entering grams.
pub const QUICK_GRAM_STEPS: [u32; 3] = [50, 100, 200];

fn parse_decimal(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().replace(',', ".").parse().ok()?;
    value.is_finite().then_some(value)
}

/// Four whitespace-separated numbers: kcal, protein, fat, carbohydrate per 100 g.
pub fn parse_macros(text: &str) -> Option<Nutrients> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() != 4 {
        return None;
    }
    let mut values = [0.0_f64; 4];
    for (slot, part) in values.iter_mut().zip(parts) {
        let value = parse_decimal(part)?;
        if value < 0.0 {
            return None;
        }
        *slot = value;
    }
    Some(Nutrients::new(values[0], values[1], values[2], values[3]))
}

fn labelled_line(text: &str, label: &str) -> Option<String> {
    let pattern = format!(r"(?mi)^[ \t]*{}:[ \t]*(.+)$", label);
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(text)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// A block with both an `RU: <name>` and an `EN: <name>` line, labels case-insensitive.
pub fn parse_names(text: &str) -> Option<ProductNames> {
    let ru = labelled_line(text, "RU")?;
    let en = labelled_line(text, "EN")?;
    Some(ProductNames::new(ru, en))
}

/// Absolute gram value. Must be positive.
pub fn parse_grams(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_suffix('g')
        .or_else(|| trimmed.strip_suffix('г'))
        .unwrap_or(trimmed);
    let grams = parse_decimal(trimmed)?;
    (grams > 0.0).then_some(grams)
}

/// Recognises a typed quick increment such as `+50` or `➕ +100 g`.
pub fn parse_quick_grams(text: &str) -> Option<u32> {
    let (_, tail) = text.split_once('+')?;
    let digits: String = tail
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let step: u32 = digits.parse().ok()?;
    QUICK_GRAM_STEPS.contains(&step).then_some(step)
}

/// Positive whole-unit price.
pub fn parse_price(text: &str) -> Option<i64> {
    let price: i64 = text.trim().parse().ok()?;
    (price > 0).then_some(price)
}
