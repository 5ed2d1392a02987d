pub mod env;
pub mod telemetry;

use ring::constant_time::verify_slices_are_equal;

/// Compares two signature strings in constant time so the comparison itself
/// cannot leak how much of a forged signature matched.
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_time_cmp() {
        let expects = "sha256=deadbeef";

        assert!(constant_time_cmp(expects, "sha256=deadbeef"));
        assert!(!constant_time_cmp(expects, "sha256=deadbeee"));
        assert!(!constant_time_cmp(expects, "sha256=deadbee"));
        assert!(!constant_time_cmp(expects, "sha256=deadbeef0"));
        assert!(!constant_time_cmp(expects, ""));
    }
}
