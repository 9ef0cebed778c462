//! Work-unit arithmetic shared by the staff and tool allocators.

/// Work a single assignee contributes to one task during one weekly tick.
///
/// `share` is the number of tasks the assignee is spread across this tick;
/// the workforce divides equally between them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorkUnit {
    pub workforce: f64,
    pub skill: f64,
    pub share: u32,
}

impl WorkUnit {
    pub fn new(workforce: f64, skill: f64, share: u32) -> Self {
        Self {
            workforce,
            skill,
            share,
        }
    }

    /// Raw work before tool bonuses: `(workforce / share) * skill`.
    pub fn raw(self) -> f64 {
        let share = self.share.max(1) as f64;
        let value = (self.workforce / share) * self.skill;
        sanitize(value)
    }

    pub fn boosted(self, speed_bonus: f64) -> f64 {
        applied_work(self.raw(), speed_bonus)
    }
}

/// Work actually applied to a task: raw staff work scaled by the tool bonus.
///
/// Negative or non-finite inputs collapse to zero so a task's applied work
/// can only ever grow.
pub fn applied_work(raw: f64, speed_bonus: f64) -> f64 {
    sanitize(raw * speed_bonus)
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workforce_divides_by_share() {
        assert_eq!(WorkUnit::new(50.0, 1.0, 1).raw(), 50.0);
        assert_eq!(WorkUnit::new(50.0, 1.0, 2).raw(), 25.0);
        assert_eq!(WorkUnit::new(50.0, 0.5, 2).raw(), 12.5);
    }

    #[test]
    fn zero_share_counts_as_one() {
        assert_eq!(WorkUnit::new(40.0, 1.0, 0).raw(), 40.0);
    }

    #[test]
    fn bonus_multiplies_raw_work() {
        let unit = WorkUnit::new(50.0, 1.0, 1);
        assert!((unit.boosted(1.2) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_apply_nothing() {
        assert_eq!(applied_work(-10.0, 1.5), 0.0);
        assert_eq!(applied_work(f64::NAN, 1.0), 0.0);
        assert_eq!(applied_work(10.0, f64::INFINITY), 0.0);
        assert_eq!(WorkUnit::new(30.0, -1.0, 1).raw(), 0.0);
    }
}
