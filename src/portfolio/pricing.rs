//! Parsing of free-form price strings produced by the strategy generator.

/// Parse a price or a price range into a single number.
///
/// Currency symbols and thousands separators are dropped. A single number is
/// returned as-is, several numbers (a `"low - high"` range) are averaged.
/// Returns `f64::NAN` when nothing numeric is left.
pub fn parse_price(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || c.is_whitespace())
        .collect();

    let values: Vec<f64> = cleaned
        .split_whitespace()
        .flat_map(parse_token)
        .collect();

    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn parse_token(token: &str) -> Vec<f64> {
    if let Ok(value) = token.parse::<f64>() {
        return vec![value];
    }
    // "34.0-36.0" written without spaces
    match token.get(1..).and_then(|rest| rest.find('-')) {
        Some(split) => {
            let (low, high) = token.split_at(split + 1);
            [low, &high[1..]]
                .iter()
                .filter_map(|part| part.parse::<f64>().ok())
                .collect()
        }
        None => Vec::new(),
    }
}
