//! Field validators for document steps. Each returns the cleaned value or a
//! `ValidationError` whose message is shown to the user unchanged.

use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;

use crate::domain::draft::{LineItem, Money};
use crate::errors::ValidationError;

const MAX_LINE_ITEMS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationContext {
    pub today: NaiveDate,
    pub default_currency: String,
}

impl ValidationContext {
    pub fn new(today: NaiveDate, default_currency: impl Into<String>) -> Self {
        Self { today, default_currency: default_currency.into() }
    }
}

pub fn validate_text(
    field: &'static str,
    label: &str,
    input: &str,
    max_chars: usize,
) -> Result<String, ValidationError> {
    let value = input.trim();
    if value.is_empty() {
        return Err(ValidationError::new(field, format!("Please enter {label}.")));
    }
    if value.chars().count() > max_chars {
        return Err(ValidationError::new(
            field,
            format!("That's a bit long. Please keep {label} under {max_chars} characters."),
        ));
    }
    Ok(value.to_owned())
}

/// Accepts `local@domain.tld`; no quoting, comments or IP literals.
pub fn validate_email(field: &'static str, input: &str) -> Result<String, ValidationError> {
    let value = input.trim();
    let invalid = || {
        ValidationError::new(
            field,
            format!("`{value}` doesn't look like an email address. Try something like name@example.com."),
        )
    };

    if value.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    let well_formed_domain = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
        && labels.last().is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|ch| ch.is_ascii_alphabetic()));
    if !well_formed_domain {
        return Err(invalid());
    }

    Ok(value.to_ascii_lowercase())
}

fn symbol_currency(symbol: char) -> Option<&'static str> {
    match symbol {
        '$' => Some("USD"),
        '€' => Some("EUR"),
        '£' => Some("GBP"),
        '₦' => Some("NGN"),
        _ => None,
    }
}

/// Parses `1,250.50 EUR`, `$500`, `200000 NGN` or a bare number in the default currency.
pub fn parse_amount(input: &str, default_currency: &str) -> Result<Money, ValidationError> {
    let invalid = || {
        ValidationError::new(
            "amount",
            "Please enter an amount like `500`, `500 USD` or `$1,250.50`.",
        )
    };

    let mut rest = input.trim();
    let mut currency = None;
    if let Some(first) = rest.chars().next() {
        if let Some(code) = symbol_currency(first) {
            currency = Some(code.to_owned());
            rest = rest[first.len_utf8()..].trim_start();
        }
    }

    let number_len = rest
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_digit() || *ch == ',' || *ch == '.'))
        .map_or(rest.len(), |(index, _)| index);
    let (number, tail) = rest.split_at(number_len);
    if number.is_empty() || !number.starts_with(|ch: char| ch.is_ascii_digit()) {
        return Err(invalid());
    }
    if !thousands_separators_valid(number) {
        return Err(invalid());
    }
    let amount = Decimal::from_str(&number.replace(',', "")).map_err(|_| invalid())?;
    if amount <= Decimal::ZERO {
        return Err(ValidationError::new("amount", "The amount must be greater than zero."));
    }

    let tail = tail.trim();
    if !tail.is_empty() {
        let explicit = if let Some(code) = tail.chars().next().and_then(symbol_currency) {
            if tail.chars().count() != 1 {
                return Err(invalid());
            }
            code.to_owned()
        } else if (3..=5).contains(&tail.len()) && tail.chars().all(|ch| ch.is_ascii_alphabetic()) {
            tail.to_ascii_uppercase()
        } else {
            return Err(invalid());
        };

        if currency.as_ref().is_some_and(|symbol| symbol != &explicit) {
            return Err(ValidationError::new(
                "amount",
                "The currency symbol and code disagree. Use one or the other.",
            ));
        }
        currency = Some(explicit);
    }

    Ok(Money { amount, currency: currency.unwrap_or_else(|| default_currency.to_owned()) })
}

fn thousands_separators_valid(number: &str) -> bool {
    if !number.contains(',') {
        return true;
    }
    let integer = number.split('.').next().unwrap_or_default();
    let mut groups = integer.split(',');
    let head_ok = groups.next().is_some_and(|head| (1..=3).contains(&head.len()));
    head_ok && groups.all(|group| group.len() == 3)
}

/// Resolves `today`, `tomorrow`, `in N days|weeks` and strict `YYYY-MM-DD`.
pub fn parse_date(input: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let normalized = input.trim().trim_end_matches('.').to_ascii_lowercase();
    let unsupported = || {
        ValidationError::new(
            "due_date",
            format!(
                "I couldn't read `{}` as a date. Use `YYYY-MM-DD`, `today`, `tomorrow` or `in 30 days`.",
                input.trim()
            ),
        )
    };

    match normalized.as_str() {
        "today" => return Ok(today),
        "tomorrow" => return Ok(today + Duration::days(1)),
        _ => {}
    }

    let words: Vec<&str> = normalized.split_whitespace().collect();
    if let ["in", count, unit] = words.as_slice() {
        let count: i64 = count.parse().map_err(|_| unsupported())?;
        if !(1..=3_650).contains(&count) {
            return Err(unsupported());
        }
        let days = match *unit {
            "day" | "days" => count,
            "week" | "weeks" => count * 7,
            _ => return Err(unsupported()),
        };
        return today.checked_add_signed(Duration::days(days)).ok_or_else(unsupported);
    }

    let bytes = normalized.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes.iter().enumerate().all(|(index, b)| index == 4 || index == 7 || b.is_ascii_digit());
    if !shaped {
        return Err(unsupported());
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d").map_err(|_| {
        ValidationError::new(
            "due_date",
            format!("{} is not a real calendar date.", input.trim()),
        )
    })
}

/// Explicit dates are kept as written, including ones before today, so an
/// invoice can be back-dated.
pub fn validate_due_date(input: &str, ctx: &ValidationContext) -> Result<NaiveDate, ValidationError> {
    parse_date(input, ctx.today)
}

/// Items are separated by newlines or `;` (commas when neither is present); an
/// item may end with a price such as `Logo design - 200`.
pub fn parse_line_items(input: &str) -> Result<Vec<LineItem>, ValidationError> {
    let trimmed = input.trim();
    let raw_items: Vec<&str> = if trimmed.contains('\n') || trimmed.contains(';') {
        trimmed.split(['\n', ';']).collect()
    } else {
        trimmed.split(", ").collect()
    };

    let items: Vec<LineItem> = raw_items
        .into_iter()
        .map(|item| item.trim().trim_start_matches(['-', '*', '•']).trim())
        .filter(|item| !item.is_empty())
        .map(parse_line_item)
        .collect();

    if items.is_empty() {
        return Err(ValidationError::new(
            "line_items",
            "Please list at least one item, one per line or separated by `;`.",
        ));
    }
    if items.len() > MAX_LINE_ITEMS {
        return Err(ValidationError::new(
            "line_items",
            format!("That's more than {MAX_LINE_ITEMS} items. Please group some of them."),
        ));
    }
    Ok(items)
}

fn parse_line_item(item: &str) -> LineItem {
    let priced = [" - ", ": ", " = "].iter().find_map(|separator| {
        let (description, price) = item.rsplit_once(separator)?;
        let price = price.trim().trim_start_matches(|ch: char| symbol_currency(ch).is_some());
        let amount = Decimal::from_str(&price.replace(',', "")).ok()?;
        (!description.trim().is_empty()).then(|| LineItem {
            description: description.trim().to_owned(),
            amount: Some(amount),
        })
    });

    priced.unwrap_or_else(|| LineItem { description: item.to_owned(), amount: None })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{
        parse_amount, parse_date, parse_line_items, validate_due_date, validate_email,
        ValidationContext,
    };

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn amounts_parse_with_and_without_currency() {
        let usd = parse_amount("500 USD", "USD").expect("500 USD");
        assert_eq!((usd.amount, usd.currency.as_str()), (Decimal::new(500, 0), "USD"));

        let ngn = parse_amount("200000 NGN", "USD").expect("200000 NGN");
        assert_eq!((ngn.amount, ngn.currency.as_str()), (Decimal::new(200_000, 0), "NGN"));

        let bare = parse_amount("500", "EUR").expect("500");
        assert_eq!((bare.amount, bare.currency.as_str()), (Decimal::new(500, 0), "EUR"));

        let symbol = parse_amount("$1,250.50", "NGN").expect("$1,250.50");
        assert_eq!((symbol.amount, symbol.currency.as_str()), (Decimal::new(125_050, 2), "USD"));

        let lower = parse_amount("75 gbp", "USD").expect("75 gbp");
        assert_eq!(lower.currency, "GBP");
    }

    #[test]
    fn non_numeric_amounts_are_rejected() {
        assert!(parse_amount("five hundred", "USD").is_err());
        assert!(parse_amount("USD 500", "USD").is_err());
        assert!(parse_amount("0", "USD").is_err());
        assert!(parse_amount("12,34 USD", "USD").is_err());
        assert!(parse_amount("$500 EUR", "USD").is_err());
    }

    #[test]
    fn relative_and_absolute_dates_resolve() {
        let today = day(2026, 3, 1);
        assert_eq!(parse_date("in 30 days", today), Ok(day(2026, 3, 31)));
        assert_eq!(parse_date("in 2 weeks", today), Ok(day(2026, 3, 15)));
        assert_eq!(parse_date("Tomorrow", today), Ok(day(2026, 3, 2)));
        assert_eq!(parse_date("2024-02-15", today), Ok(day(2024, 2, 15)));
    }

    #[test]
    fn unsupported_or_impossible_dates_are_rejected() {
        let today = day(2026, 3, 1);
        assert!(parse_date("next month", today).is_err());
        assert!(parse_date("2026-02-30", today).is_err());
        assert!(parse_date("2026-3-5", today).is_err());
        assert!(parse_date("in thirty days", today).is_err());
    }

    #[test]
    fn explicit_due_dates_pass_through_even_when_past() {
        let ctx = ValidationContext::new(day(2026, 3, 1), "USD");
        assert_eq!(validate_due_date("2024-02-15", &ctx), Ok(day(2024, 2, 15)));
        assert_eq!(validate_due_date("today", &ctx), Ok(day(2026, 3, 1)));
        assert!(validate_due_date("next month", &ctx).is_err());
    }

    #[test]
    fn emails_need_local_part_and_dotted_domain() {
        assert_eq!(validate_email("issuer_email", " Ada@Example.COM "), Ok("ada@example.com".to_owned()));
        assert!(validate_email("issuer_email", "ada@example").is_err());
        assert!(validate_email("issuer_email", "@example.com").is_err());
        assert!(validate_email("issuer_email", "ada lovelace@example.com").is_err());
        assert!(validate_email("issuer_email", "ada@@example.com").is_err());
    }

    #[test]
    fn line_items_split_and_pick_up_prices() {
        let items = parse_line_items("Logo design - 200\nLanding page: 1,500\nHosting setup")
            .expect("items");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].description, "Logo design");
        assert_eq!(items[0].amount, Some(Decimal::new(200, 0)));
        assert_eq!(items[1].amount, Some(Decimal::new(1_500, 0)));
        assert_eq!(items[2].amount, None);

        let comma = parse_line_items("copywriting, photography").expect("comma items");
        assert_eq!(comma.len(), 2);
        assert!(parse_line_items(" ; \n ").is_err());
    }
}
