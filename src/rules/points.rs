//! Point arithmetic for purchase evaluation. All products are floored to
//! whole points except the base computation, which honors the tenant's
//! configured rounding rule.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingRule {
    #[default]
    Floor,
    Round,
}

impl RoundingRule {
    /// Unknown values fall back to `Floor`, the conservative default.
    pub fn parse(s: &str) -> Self {
        match s {
            "round" => RoundingRule::Round,
            _ => RoundingRule::Floor,
        }
    }
}

/// `round_or_floor(total × rate)`, never negative.
pub fn base_points(total: f64, rate: f64, rule: RoundingRule) -> i64 {
    let raw = total * rate;
    let value = match rule {
        RoundingRule::Floor => raw.floor(),
        RoundingRule::Round => raw.round(),
    };

    (value.max(0.0)) as i64
}

/// `floor(base × multiplier)`.
pub fn tier_points(base: i64, multiplier: f64) -> i64 {
    ((base as f64 * multiplier).floor().max(0.0)) as i64
}

/// Extra points a multiplier campaign contributes on top of the base:
/// `floor(base × (m − 1))`, and only when that is positive.
pub fn multiplier_bonus(base: i64, multiplier: f64) -> i64 {
    let bonus = (base as f64 * (multiplier - 1.0)).floor();
    if bonus > 0.0 { bonus as i64 } else { 0 }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base_respects_rounding_rule() {
        assert_eq!(base_points(25.0, 1.0, RoundingRule::Floor), 25);
        assert_eq!(base_points(25.9, 1.0, RoundingRule::Floor), 25);
        assert_eq!(base_points(25.9, 1.0, RoundingRule::Round), 26);
        assert_eq!(base_points(10.0, 0.5, RoundingRule::Floor), 5);
        assert_eq!(base_points(10.0, 0.0, RoundingRule::Floor), 0);
    }

    #[test]
    fn base_never_goes_negative() {
        assert_eq!(base_points(-5.0, 1.0, RoundingRule::Floor), 0);
    }

    #[test]
    fn tier_multiplier_floors() {
        // 25 base at 1.25x: floor(31.25) = 31
        assert_eq!(tier_points(25, 1.25), 31);
        assert_eq!(tier_points(25, 1.0), 25);
        assert_eq!(tier_points(0, 3.0), 0);
    }

    #[test]
    fn multiplier_bonus_only_when_positive() {
        assert_eq!(multiplier_bonus(25, 2.0), 25);
        assert_eq!(multiplier_bonus(25, 1.5), 12);
        assert_eq!(multiplier_bonus(25, 1.0), 0);
        // sub-1 multipliers never subtract points
        assert_eq!(multiplier_bonus(25, 0.5), 0);
    }

    #[test]
    fn unknown_rounding_rule_defaults_to_floor() {
        assert_eq!(RoundingRule::parse("banker"), RoundingRule::Floor);
        assert_eq!(RoundingRule::parse("round"), RoundingRule::Round);
        assert_eq!(RoundingRule::parse("floor"), RoundingRule::Floor);
    }
}
