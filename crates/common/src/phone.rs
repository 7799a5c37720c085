//! E.164 phone number normalization.

use crate::error::{Error, Result, codes};

/// Channel prefix the provider puts in front of addresses.
pub const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Normalize a raw address (`whatsapp:+1 (415) 555-0100`) to E.164 (`+14155550100`).
///
/// Accepts an optional channel prefix, spaces, dashes, dots and parentheses.
/// The result is `+` followed by 8 to 15 digits with no leading zero.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(WHATSAPP_PREFIX).unwrap_or(trimmed);

    let mut digits = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => digits.push(c),
            '+' if i == 0 => {},
            ' ' | '-' | '.' | '(' | ')' => {},
            _ => {
                return Err(Error::validation(
                    codes::INVALID_PHONE,
                    format!("invalid character {c:?} in phone number"),
                ));
            },
        }
    }

    if !(8..=15).contains(&digits.len()) || digits.starts_with('0') {
        return Err(Error::validation(
            codes::INVALID_PHONE,
            format!("{raw:?} is not an E.164 phone number"),
        ));
    }

    Ok(format!("+{digits}"))
}

/// Prefix an E.164 number with the channel prefix for the provider API.
pub fn channel_address(phone: &str) -> String {
    if phone.starts_with(WHATSAPP_PREFIX) {
        phone.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{phone}")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("+14155550100", "+14155550100")]
    #[case("whatsapp:+14155550100", "+14155550100")]
    #[case(" +1 (415) 555-0100 ", "+14155550100")]
    #[case("447700900123", "+447700900123")]
    #[case("+55.11.91234.5678", "+5511912345678")]
    fn normalizes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_phone(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("+123")]
    #[case("+1234567890123456")]
    #[case("+04155550100")]
    #[case("+1415abc0100")]
    #[case("1+4155550100")]
    fn rejects(#[case] raw: &str) {
        let err = normalize_phone(raw).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_PHONE);
    }

    #[test]
    fn channel_address_is_idempotent() {
        assert_eq!(channel_address("+14155550100"), "whatsapp:+14155550100");
        assert_eq!(
            channel_address("whatsapp:+14155550100"),
            "whatsapp:+14155550100"
        );
    }
}
