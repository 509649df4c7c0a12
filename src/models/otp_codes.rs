use std::time::Duration;

/// Outcome of handing a code to the notification sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed,
}

/// A code that has been stored for an identity.
///
/// `code` stays in memory so the caller can decide on a degraded fallback
/// when delivery failed; it is never logged.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub expires_in: Duration,
    pub delivery: Delivery,
}

/// Normalizes an email identity the same way for every keyed store.
pub fn normalize_identity(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Exactly six ASCII digits.
pub fn is_well_formed_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_normalization() {
        assert_eq!(normalize_identity("  A@X.com "), "a@x.com");
    }

    #[test]
    fn test_code_shape() {
        assert!(is_well_formed_code("042017"));
        assert!(!is_well_formed_code("42017"));
        assert!(!is_well_formed_code("04201a"));
        assert!(!is_well_formed_code("٠٤٢٠١٧"));
    }
}
