//! Process-lifetime device identifier.
//!
//! `DEVICE-XXXXXXXX` where `XXXXXXXX` is 8 uppercase hex digits of a fresh
//! random value, generated once at startup (spec §3).

use rand::Rng;

pub fn generate() -> String {
    let value: u32 = rand::rng().random();
    format!("DEVICE-{value:08X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_expected_shape() {
        let id = generate();
        assert!(id.starts_with("DEVICE-"));
        assert_eq!(id.len(), 15);
        assert!(id["DEVICE-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            id["DEVICE-".len()..],
            id["DEVICE-".len()..].to_uppercase()
        );
    }

    #[test]
    fn is_reasonably_unique() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }
}
