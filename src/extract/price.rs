//! Money-mention parsing for free-text tokens and LLM output cleanup.

#[derive(Debug, Clone, PartialEq)]
pub struct PriceMention {
    pub amount: f64,
    pub currency: Option<&'static str>,
    /// The exact words matched, so callers can strip them from a name.
    pub source: String,
}

const SYMBOLS: [(char, &'static str); 4] =
    [('$', "USD"), ('€', "EUR"), ('£', "GBP"), ('¥', "JPY")];

const CODES: [&str; 7] = ["USD", "EUR", "GBP", "CAD", "AUD", "JPY", "CHF"];

/// First money mention in a chunk of prose, if any. Recognizes symbol-prefixed
/// and symbol-suffixed amounts plus `CODE amount` pairs; bare numbers are not
/// prices.
pub fn find_price(text: &str) -> Option<PriceMention> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for (pos, word) in words.iter().enumerate() {
        let cleaned = trim_punctuation(word);
        if let Some(mention) = parse_price(cleaned) {
            return Some(mention);
        }
        if let Some(code) = currency_code(cleaned)
            && let Some(next) = words.get(pos + 1)
            && let Some(amount) = parse_amount(trim_punctuation(next))
        {
            return Some(PriceMention {
                amount,
                currency: Some(code),
                source: format!("{cleaned} {}", trim_punctuation(next)),
            });
        }
    }
    None
}

pub fn parse_price(raw: &str) -> Option<PriceMention> {
    let raw = raw.trim();
    for (symbol, code) in SYMBOLS {
        if let Some(rest) = raw.strip_prefix(symbol) {
            return parse_amount(rest).map(|amount| PriceMention {
                amount,
                currency: Some(code),
                source: raw.to_string(),
            });
        }
        if let Some(rest) = raw.strip_suffix(symbol) {
            return parse_amount(rest).map(|amount| PriceMention {
                amount,
                currency: Some(code),
                source: raw.to_string(),
            });
        }
    }
    None
}

fn currency_code(word: &str) -> Option<&'static str> {
    let upper = word.to_ascii_uppercase();
    CODES.iter().find(|code| **code == upper).copied()
}

/// Lenient amount coercion for model output: accepts `120`, `120.00`,
/// `$120`, `1,299`.
pub fn coerce_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    parse_amount(trimmed).or_else(|| parse_price(trimmed).map(|mention| mention.amount))
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|ch| *ch != ',').collect();
    if !cleaned.chars().next()?.is_ascii_digit() {
        return None;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}

fn trim_punctuation(word: &str) -> &str {
    word.trim_matches(|ch: char| matches!(ch, ',' | ';' | '.' | '(' | ')' | '"'))
}
