//! The supported currencies and how amounts are displayed in each of them.

use serde::Serialize;

/// The currency used when a user has not picked one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Which side of the number the currency symbol goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolPosition {
    /// "$1,234.56"
    Before,
    /// "1.234,56 €", always with a space between number and symbol.
    After,
}

/// How amounts in one currency are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Currency {
    /// ISO 4217 code, e.g. "EUR".
    pub code: &'static str,
    /// The English name, e.g. "Euro".
    pub name: &'static str,
    pub symbol: &'static str,
    /// Digits after the decimal separator.
    pub decimals: usize,
    pub thousands_separator: &'static str,
    pub decimal_separator: &'static str,
    /// Which side of the number the symbol goes.
    pub position: SymbolPosition,
}

const fn currency(
    code: &'static str,
    name: &'static str,
    symbol: &'static str,
    decimals: usize,
    thousands_separator: &'static str,
    decimal_separator: &'static str,
    position: SymbolPosition,
) -> Currency {
    Currency {
        code,
        name,
        symbol,
        decimals,
        thousands_separator,
        decimal_separator,
        position,
    }
}

use SymbolPosition::{After, Before};

static CURRENCIES: [Currency; 30] = [
    currency("USD", "US Dollar", "$", 2, ",", ".", Before),
    currency("EUR", "Euro", "€", 2, ".", ",", After),
    currency("GBP", "British Pound", "£", 2, ",", ".", Before),
    currency("JPY", "Japanese Yen", "¥", 0, ",", ".", Before),
    currency("CNY", "Chinese Yuan", "CN¥", 2, ",", ".", Before),
    currency("INR", "Indian Rupee", "₹", 2, ",", ".", Before),
    currency("AUD", "Australian Dollar", "A$", 2, ",", ".", Before),
    currency("CAD", "Canadian Dollar", "C$", 2, ",", ".", Before),
    currency("CHF", "Swiss Franc", "CHF", 2, "'", ".", After),
    currency("SEK", "Swedish Krona", "kr", 2, " ", ",", After),
    currency("NOK", "Norwegian Krone", "kr", 2, " ", ",", After),
    currency("DKK", "Danish Krone", "kr.", 2, ".", ",", After),
    currency("PLN", "Polish Zloty", "zł", 2, " ", ",", After),
    currency("CZK", "Czech Koruna", "Kč", 2, " ", ",", After),
    currency("HUF", "Hungarian Forint", "Ft", 0, " ", ",", After),
    currency("RUB", "Russian Ruble", "₽", 2, " ", ",", After),
    currency("BRL", "Brazilian Real", "R$", 2, ".", ",", Before),
    currency("MXN", "Mexican Peso", "MX$", 2, ",", ".", Before),
    currency("ZAR", "South African Rand", "R", 2, " ", ".", Before),
    currency("NZD", "New Zealand Dollar", "NZ$", 2, ",", ".", Before),
    currency("SGD", "Singapore Dollar", "S$", 2, ",", ".", Before),
    currency("HKD", "Hong Kong Dollar", "HK$", 2, ",", ".", Before),
    currency("KRW", "South Korean Won", "₩", 0, ",", ".", Before),
    currency("TRY", "Turkish Lira", "₺", 2, ".", ",", Before),
    currency("ILS", "Israeli New Shekel", "₪", 2, ",", ".", Before),
    currency("AED", "UAE Dirham", "AED", 2, ",", ".", After),
    currency("SAR", "Saudi Riyal", "SAR", 2, ",", ".", After),
    currency("THB", "Thai Baht", "฿", 2, ",", ".", Before),
    currency("IDR", "Indonesian Rupiah", "Rp", 0, ".", ",", Before),
    currency("PHP", "Philippine Peso", "₱", 2, ",", ".", Before),
];

/// Every supported currency.
pub fn all() -> &'static [Currency] {
    &CURRENCIES
}

/// The currency with `code`, ignoring case.
pub fn get(code: &str) -> Option<&'static Currency> {
    CURRENCIES
        .iter()
        .find(|currency| currency.code.eq_ignore_ascii_case(code.trim()))
}

/// Whether `code` is a supported currency.
pub fn is_valid(code: &str) -> bool {
    get(code).is_some()
}

fn get_or_default(code: &str) -> &'static Currency {
    get(code).unwrap_or(&CURRENCIES[0])
}

/// Write `amount` the way it is written in the currency `code`, e.g.
/// `format(1234.5, "EUR") == "1.234,50 €"`.
///
/// Unknown codes are formatted as [DEFAULT_CURRENCY].
pub fn format(amount: f64, code: &str) -> String {
    let currency = get_or_default(code);

    let digits = format!("{:.*}", currency.decimals, amount.abs());
    let (integer, fraction) = match digits.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (digits.as_str(), None),
    };

    let mut number = group_thousands(integer, currency.thousands_separator);
    if let Some(fraction) = fraction {
        number.push_str(currency.decimal_separator);
        number.push_str(fraction);
    }

    let is_negative = amount < 0.0 && digits.chars().any(|c| matches!(c, '1'..='9'));
    let sign = if is_negative { "-" } else { "" };

    match currency.position {
        Before => format!("{sign}{}{number}", currency.symbol),
        After => format!("{sign}{number} {}", currency.symbol),
    }
}

fn group_thousands(integer: &str, separator: &str) -> String {
    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3 * separator.len());

    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push_str(separator);
        }
        grouped.push(digit);
    }

    grouped
}

/// Read an amount written by [format] back into a number.
///
/// Returns `None` if `formatted` is not an amount in the currency `code`.
pub fn parse_back(formatted: &str, code: &str) -> Option<f64> {
    let currency = get_or_default(code);

    let text = formatted.trim();
    let (is_negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let number = match currency.position {
        Before => text.strip_prefix(currency.symbol)?,
        After => text.strip_suffix(currency.symbol)?,
    }
    .trim();

    let mut normalized = number.replace(currency.thousands_separator, "");
    if currency.decimals > 0 {
        normalized = normalized.replace(currency.decimal_separator, ".");
    }

    if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let amount: f64 = normalized.parse().ok()?;

    Some(if is_negative { -amount } else { amount })
}

#[cfg(test)]
mod tests {
    use super::{all, format, get, is_valid, parse_back};

    #[test]
    fn has_thirty_unique_currencies() {
        let mut codes: Vec<_> = all().iter().map(|currency| currency.code).collect();
        codes.sort_unstable();
        codes.dedup();

        assert_eq!(codes.len(), 30);
    }

    #[test]
    fn formats_common_currencies() {
        assert_eq!(format(1234.5, "USD"), "$1,234.50");
        assert_eq!(format(1234.5, "EUR"), "1.234,50 €");
        assert_eq!(format(1234.6, "JPY"), "¥1,235");
        assert_eq!(format(1234567.891, "SEK"), "1 234 567,89 kr");
        assert_eq!(format(0.0, "GBP"), "£0.00");
        assert_eq!(format(-12.3, "USD"), "-$12.30");
    }

    #[test]
    fn negative_amount_that_rounds_to_zero_has_no_sign() {
        assert_eq!(format(-0.001, "USD"), "$0.00");
    }

    #[test]
    fn unknown_code_uses_default_format() {
        assert_eq!(format(5.0, "XYZ"), "$5.00");
    }

    #[test]
    fn lookup_ignores_case() {
        assert!(is_valid("eur"));
        assert_eq!(get("nzd").map(|currency| currency.symbol), Some("NZ$"));
        assert!(!is_valid("XYZ"));
    }

    #[test]
    fn parse_back_inverts_format_for_every_currency() {
        let amounts = [0.0, 0.5, 7.0, 12.34, 999.99, 1000.0, 1234.56, 98765.4, 1234567.89, -42.1];

        for currency in all() {
            for amount in amounts {
                let formatted = format(amount, currency.code);

                let parsed = parse_back(&formatted, currency.code)
                    .unwrap_or_else(|| panic!("could not parse {formatted:?} as {}", currency.code));

                assert_eq!(
                    format(parsed, currency.code),
                    formatted,
                    "round trip failed for {}",
                    currency.code
                );
            }
        }
    }

    #[test]
    fn parse_back_rejects_other_currencies() {
        assert_eq!(parse_back("1.234,50 €", "USD"), None);
        assert_eq!(parse_back("$abc", "USD"), None);
        assert_eq!(parse_back("$1,234.50", "USD"), Some(1234.5));
    }
}
