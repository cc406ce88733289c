use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

const TRACKING_PREFIX: &str = "DLG";
const TRACKING_SUFFIX_LEN: usize = 5;

/// Six-digit delivery code, never starting with zero.
pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

/// `DLG` + base36 millisecond timestamp + random upper-case suffix.
pub fn generate_tracking_number() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRACKING_SUFFIX_LEN)
        .map(|byte| (byte as char).to_ascii_uppercase())
        .collect();

    format!("{TRACKING_PREFIX}{}{suffix}", to_base36(millis))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// Compares without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..500 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(otp.as_bytes()[0], b'0');
        }
    }

    #[test]
    fn tracking_numbers_are_prefixed_and_distinct() {
        let numbers: HashSet<String> = (0..200).map(|_| generate_tracking_number()).collect();
        assert_eq!(numbers.len(), 200);
        for number in &numbers {
            assert!(number.starts_with("DLG"));
            assert!(number.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn base36_matches_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn constant_time_eq_behaves_like_eq() {
        assert!(constant_time_eq("482913", "482913"));
        assert!(!constant_time_eq("482913", "482914"));
        assert!(!constant_time_eq("482913", "48291"));
        assert!(!constant_time_eq("", "1"));
    }
}
