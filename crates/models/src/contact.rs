use validator::ValidateEmail;

/// Checks if an email string is a valid RFC 5322 mailbox.
pub fn is_email_valid(email: &str) -> bool {
    email.validate_email()
}

/// Checks if a phone string is valid E.164: a leading `+`, a non-zero
/// country code digit, and at most 15 digits total. Numbers are expected
/// to be supplied with their country code.
pub fn is_phone_valid(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };

    if digits.len() < 2 || digits.len() > 15 {
        return false;
    }

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    !digits.starts_with('0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_email_valid("jane@example.com"));
        assert!(is_email_valid("jane+tag@sub.example.co"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_email_valid("jane"));
        assert!(!is_email_valid("jane@"));
        assert!(!is_email_valid("@example.com"));
    }

    #[test]
    fn test_valid_phones() {
        assert!(is_phone_valid("+15555551234"));
        assert!(is_phone_valid("+447911123456"));
    }

    #[test]
    fn test_invalid_phones() {
        assert!(!is_phone_valid("15555551234"));
        assert!(!is_phone_valid("+0155555"));
        assert!(!is_phone_valid("+1555-555"));
        assert!(!is_phone_valid("+1234567890123456"));
        assert!(!is_phone_valid("+1"));
    }
}
