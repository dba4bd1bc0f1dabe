//! Pure field validators.
//!
//! Nothing here performs I/O or keeps state: every function returns the same
//! answer for the same input, and invalid input is reported through
//! [`FieldError`] rather than a panic.

use time::{Date, Month};

/// Outcome of validating one field.
pub type ValidationResult = Result<(), FieldError>;

/// Why a field value was rejected. `Display` is the message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("Card number must be {expected} digits")]
    CardNumberLength { expected: usize },
    #[error("Invalid card number")]
    CardNumberChecksum,
    #[error("CVV must contain only numbers")]
    CvvNotNumeric,
    #[error("CVV must be {expected} digits")]
    CvvLength { expected: usize },
    #[error("Please select both month and year")]
    ExpiryIncomplete,
    #[error("Invalid expiry date")]
    ExpiryInvalid,
    #[error("Card has expired")]
    Expired,
    #[error("PIN must be exactly 4 digits")]
    PinFormat,
    #[error("PINs do not match")]
    PinMismatch,
}

/// Card network derived from the leading digits of a card number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Unknown,
}

impl CardBrand {
    /// Detects the brand of a (possibly formatted) card number.
    #[must_use]
    pub fn detect(raw: &str) -> Self {
        let digits = normalize_card_number(raw);
        let prefix = |n: usize| digits.get(..n).and_then(|p| p.parse::<u32>().ok());

        if digits.starts_with('4') {
            Self::Visa
        } else if matches!(prefix(2), Some(34 | 37)) {
            Self::Amex
        } else if matches!(prefix(2), Some(51..=55)) || matches!(prefix(4), Some(2221..=2720)) {
            Self::Mastercard
        } else {
            Self::Unknown
        }
    }

    /// Expected number of digits in the card number.
    #[must_use]
    pub fn card_number_length(self) -> usize {
        match self {
            Self::Amex => 15,
            _ => 16,
        }
    }

    /// Expected number of digits in the CVV.
    #[must_use]
    pub fn cvv_length(self) -> usize {
        match self {
            Self::Amex => 4,
            _ => 3,
        }
    }
}

/// Whether a form derives lengths from the card brand or uses the plain
/// 16-digit / 3-digit gift card rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrandPolicy {
    Detect,
    #[default]
    Ignore,
}

impl BrandPolicy {
    /// Brand that drives length checks for `raw` under this policy.
    #[must_use]
    pub fn brand_for(self, raw: &str) -> CardBrand {
        match self {
            Self::Detect => CardBrand::detect(raw),
            Self::Ignore => CardBrand::Unknown,
        }
    }
}

/// Strips whitespace from a card number.
#[must_use]
pub fn normalize_card_number(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Formats a card number for display: digits only, grouped by four.
#[must_use]
pub fn format_card_number(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(char::is_ascii_digit).collect();
    digits
        .chunks(4)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Luhn checksum over a string of ASCII digits. Non-digits and empty input
/// fail the check.
#[must_use]
pub fn luhn_check(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }
    let mut sum = 0u32;
    for (i, b) in digits.bytes().rev().enumerate() {
        if !b.is_ascii_digit() {
            return false;
        }
        let mut digit = u32::from(b - b'0');
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }
    sum % 10 == 0
}

/// Validates a card number against the length expected for `brand`, then the
/// Luhn checksum.
pub fn validate_card_number(raw: &str, brand: CardBrand) -> ValidationResult {
    let digits = normalize_card_number(raw);
    let expected = brand.card_number_length();
    if digits.chars().count() != expected {
        return Err(FieldError::CardNumberLength { expected });
    }
    if !luhn_check(&digits) {
        return Err(FieldError::CardNumberChecksum);
    }
    Ok(())
}

pub fn validate_cvv(cvv: &str, brand: CardBrand) -> ValidationResult {
    if cvv.is_empty() || !cvv.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FieldError::CvvNotNumeric);
    }
    let expected = brand.cvv_length();
    if cvv.len() != expected {
        return Err(FieldError::CvvLength { expected });
    }
    Ok(())
}

/// Validates an expiry month/year selection against `today`.
///
/// The card is treated as expiring at the start of the selected month, and a
/// card expiring in the current month is still accepted.
pub fn validate_expiry(month: &str, year: &str, today: Date) -> ValidationResult {
    if month.trim().is_empty() || year.trim().is_empty() {
        return Err(FieldError::ExpiryIncomplete);
    }
    let month = month
        .trim()
        .parse::<u8>()
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .ok_or(FieldError::ExpiryInvalid)?;
    let year = year
        .trim()
        .parse::<i32>()
        .map_err(|_| FieldError::ExpiryInvalid)?;
    let expiry =
        Date::from_calendar_date(year, month, 1).map_err(|_| FieldError::ExpiryInvalid)?;

    if (expiry.year(), u8::from(expiry.month())) < (today.year(), u8::from(today.month())) {
        return Err(FieldError::Expired);
    }
    Ok(())
}

pub fn validate_new_pin(pin: &str) -> ValidationResult {
    if pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(FieldError::PinFormat)
    }
}

/// Confirmation must match exactly: no trimming, case-sensitive.
pub fn validate_pin_confirmation(pin: &str, confirmation: &str) -> ValidationResult {
    if pin == confirmation {
        Ok(())
    } else {
        Err(FieldError::PinMismatch)
    }
}

/// Validates a new PIN together with its confirmation.
pub fn validate_pin(pin: &str, confirmation: &str) -> ValidationResult {
    validate_new_pin(pin)?;
    validate_pin_confirmation(pin, confirmation)
}

/// Month choices offered by the expiry selector (`"01"` to `"12"`).
#[must_use]
pub fn expiry_month_options() -> Vec<String> {
    (1..=12).map(|m| format!("{m:02}")).collect()
}

/// Year choices offered by the expiry selector: this year and the next 20.
#[must_use]
pub fn expiry_year_options(today: Date) -> Vec<i32> {
    let year = today.year();
    (year..=year + 20).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    const TODAY: Date = date!(2026 - 10 - 19);

    /// Appends the digit that makes `body` pass the Luhn check.
    fn with_check_digit(body: &str) -> String {
        (0..=9)
            .map(|d| format!("{body}{d}"))
            .find(|candidate| luhn_check(candidate))
            .unwrap()
    }

    #[test]
    fn luhn_known_numbers() {
        assert!(luhn_check("4111111111111111"));
        assert!(luhn_check("5555555555554444"));
        assert!(luhn_check("378282246310005"));
        assert!(!luhn_check("4111111111111112"));
        assert!(!luhn_check("41111111111a1111"));
        assert!(!luhn_check(""));
    }

    #[test]
    fn sixteen_digit_luhn_numbers_are_valid_and_others_are_not() {
        for seed in 0u64..200 {
            let body = format!("{:015}", seed * 7_919_113 + 100_000_000_000_003);
            let valid = with_check_digit(&body);
            assert_eq!(
                validate_card_number(&valid, CardBrand::Unknown),
                Ok(()),
                "{valid}"
            );

            let last = valid.as_bytes()[15] - b'0';
            let broken = format!("{body}{}", (last + 1) % 10);
            assert_eq!(
                validate_card_number(&broken, CardBrand::Unknown),
                Err(FieldError::CardNumberChecksum),
                "{broken}"
            );
        }
    }

    #[test]
    fn card_number_whitespace_is_ignored() {
        assert_eq!(
            validate_card_number("4111 1111 1111 1111", CardBrand::Visa),
            Ok(())
        );
    }

    #[test]
    fn card_number_length_fails_before_checksum() {
        assert_eq!(
            validate_card_number("411111111111111", CardBrand::Visa),
            Err(FieldError::CardNumberLength { expected: 16 })
        );
        assert_eq!(
            validate_card_number("", CardBrand::Unknown),
            Err(FieldError::CardNumberLength { expected: 16 })
        );
        // A valid 16-digit Luhn number is still the wrong length for Amex.
        assert_eq!(
            validate_card_number("4111111111111111", CardBrand::Amex),
            Err(FieldError::CardNumberLength { expected: 15 })
        );
    }

    #[test]
    fn amex_uses_fifteen_digits() {
        assert_eq!(validate_card_number("3782 822463 10005", CardBrand::Amex), Ok(()));
    }

    #[test]
    fn brand_detection() {
        assert_eq!(CardBrand::detect("4111111111111111"), CardBrand::Visa);
        assert_eq!(CardBrand::detect("5105105105105100"), CardBrand::Mastercard);
        assert_eq!(CardBrand::detect("5500 0000"), CardBrand::Mastercard);
        assert_eq!(CardBrand::detect("2221000000000009"), CardBrand::Mastercard);
        assert_eq!(CardBrand::detect("2720990000000000"), CardBrand::Mastercard);
        assert_eq!(CardBrand::detect("2721000000000000"), CardBrand::Unknown);
        assert_eq!(CardBrand::detect("2220000000000000"), CardBrand::Unknown);
        assert_eq!(CardBrand::detect("340000000000000"), CardBrand::Amex);
        assert_eq!(CardBrand::detect("37"), CardBrand::Amex);
        assert_eq!(CardBrand::detect("5600000000000000"), CardBrand::Unknown);
        assert_eq!(CardBrand::detect("6011000000000000"), CardBrand::Unknown);
        assert_eq!(CardBrand::detect(""), CardBrand::Unknown);
    }

    #[test]
    fn brand_detection_is_stable() {
        for input in ["4111", "5105105105105100", "378282246310005", "9", ""] {
            let first = CardBrand::detect(input);
            for _ in 0..5 {
                assert_eq!(CardBrand::detect(input), first);
            }
        }
    }

    #[test]
    fn brand_policy() {
        assert_eq!(BrandPolicy::Ignore.brand_for("378282246310005"), CardBrand::Unknown);
        assert_eq!(BrandPolicy::Detect.brand_for("378282246310005"), CardBrand::Amex);
    }

    #[test]
    fn cvv_rules() {
        assert_eq!(validate_cvv("123", CardBrand::Visa), Ok(()));
        assert_eq!(validate_cvv("1234", CardBrand::Amex), Ok(()));
        assert_eq!(
            validate_cvv("1234", CardBrand::Visa),
            Err(FieldError::CvvLength { expected: 3 })
        );
        assert_eq!(
            validate_cvv("123", CardBrand::Amex),
            Err(FieldError::CvvLength { expected: 4 })
        );
        assert_eq!(validate_cvv("12a", CardBrand::Visa), Err(FieldError::CvvNotNumeric));
        assert_eq!(validate_cvv("", CardBrand::Visa), Err(FieldError::CvvNotNumeric));
    }

    #[test]
    fn expiry_current_month_is_valid() {
        assert_eq!(validate_expiry("10", "2026", TODAY), Ok(()));
        assert_eq!(validate_expiry("11", "2026", TODAY), Ok(()));
        assert_eq!(validate_expiry("01", "2027", TODAY), Ok(()));
    }

    #[test]
    fn expiry_earlier_month_is_expired() {
        assert_eq!(validate_expiry("09", "2026", TODAY), Err(FieldError::Expired));
        assert_eq!(validate_expiry("12", "2025", TODAY), Err(FieldError::Expired));
    }

    #[test]
    fn expiry_requires_both_fields() {
        assert_eq!(validate_expiry("", "2027", TODAY), Err(FieldError::ExpiryIncomplete));
        assert_eq!(validate_expiry("05", "", TODAY), Err(FieldError::ExpiryIncomplete));
    }

    #[test]
    fn expiry_rejects_nonsense() {
        assert_eq!(validate_expiry("13", "2027", TODAY), Err(FieldError::ExpiryInvalid));
        assert_eq!(validate_expiry("00", "2027", TODAY), Err(FieldError::ExpiryInvalid));
        assert_eq!(validate_expiry("05", "20x7", TODAY), Err(FieldError::ExpiryInvalid));
    }

    #[test]
    fn pin_rules() {
        assert_eq!(validate_pin("1234", "1234"), Ok(()));
        assert_eq!(validate_pin("123", "123"), Err(FieldError::PinFormat));
        assert_eq!(validate_pin("1234", "1235"), Err(FieldError::PinMismatch));
        assert_eq!(validate_pin("12a4", "12a4"), Err(FieldError::PinFormat));
        assert_eq!(validate_pin_confirmation("1234", "1234 "), Err(FieldError::PinMismatch));
    }

    #[test]
    fn format_groups_digits() {
        assert_eq!(format_card_number("4111111111111111"), "4111 1111 1111 1111");
        assert_eq!(format_card_number("4111-11x11"), "4111 1111");
        assert_eq!(format_card_number(""), "");
    }

    #[test]
    fn selector_options() {
        let months = expiry_month_options();
        assert_eq!(months.len(), 12);
        assert_eq!(months[0], "01");
        assert_eq!(months[11], "12");

        let years = expiry_year_options(TODAY);
        assert_eq!(years.len(), 21);
        assert_eq!(years[0], 2026);
        assert_eq!(years[20], 2046);
    }

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(
            FieldError::CardNumberLength { expected: 16 }.to_string(),
            "Card number must be 16 digits"
        );
        assert_eq!(FieldError::Expired.to_string(), "Card has expired");
    }
}
