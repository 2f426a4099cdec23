use core::cmp::Ordering;
use core::fmt;

/// Rows a scan reads per IO unit.
pub const PAGE_SIZE: f64 = 1024.0;

/// Costs within this relative distance count as equal; the tie goes to the
/// expression with the smaller id so plan choice is stable across rule
/// orderings.
pub const COST_EPSILON: f64 = 1e-5;

/// A `(rows, cpu, io)` cost tuple, compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    pub rows: f64,
    pub cpu: f64,
    pub io: f64,
}

impl Cost {
    pub const ZERO: Cost = Cost { rows: 0.0, cpu: 0.0, io: 0.0 };
    pub const INFINITY: Cost = Cost {
        rows: f64::INFINITY,
        cpu: f64::INFINITY,
        io: f64::INFINITY,
    };

    pub fn new(rows: f64, cpu: f64, io: f64) -> Self {
        Self { rows, cpu, io }
    }

    /// Cost of scanning `n` rows: one row and one cpu unit each, one IO per
    /// page.
    pub fn scan(n: f64) -> Self {
        Self { rows: n, cpu: n, io: n / PAGE_SIZE }
    }

    pub fn is_infinite(&self) -> bool {
        self.rows.is_infinite() || self.cpu.is_infinite() || self.io.is_infinite()
    }

    pub fn plus(&self, other: &Cost) -> Cost {
        Cost {
            rows: self.rows + other.rows,
            cpu: self.cpu + other.cpu,
            io: self.io + other.io,
        }
    }

    pub fn times(&self, factor: f64) -> Cost {
        Cost {
            rows: self.rows * factor,
            cpu: self.cpu * factor,
            io: self.io * factor,
        }
    }

    fn lex_cmp(&self, other: &Cost) -> Ordering {
        let dim = |a: f64, b: f64| -> Ordering {
            if within_epsilon(a, b) {
                Ordering::Equal
            } else {
                a.total_cmp(&b)
            }
        };
        dim(self.rows, other.rows)
            .then_with(|| dim(self.cpu, other.cpu))
            .then_with(|| dim(self.io, other.io))
    }

    /// Full comparison: lexicographic over the tuple, epsilon ties resolved
    /// toward the smaller expression id.
    pub fn compare(a: &Cost, a_id: u32, b: &Cost, b_id: u32) -> Ordering {
        a.lex_cmp(b).then_with(|| a_id.cmp(&b_id))
    }
}

fn within_epsilon(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    if a.is_infinite() || b.is_infinite() {
        return false;
    }
    (a - b).abs() <= COST_EPSILON * a.abs().max(b.abs()).max(1.0)
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{rows: {:.1}, cpu: {:.1}, io: {:.3}}}", self.rows, self.cpu, self.io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lexicographic_rows_dominate() {
        let a = Cost::new(10.0, 1000.0, 1000.0);
        let b = Cost::new(11.0, 1.0, 1.0);
        assert_eq!(Cost::compare(&a, 0, &b, 1), Ordering::Less);
    }

    #[test]
    fn epsilon_ties_break_on_smaller_id() {
        let a = Cost::new(100.0, 50.0, 1.0);
        let b = Cost::new(100.0 + 1e-9, 50.0, 1.0);
        assert_eq!(Cost::compare(&a, 7, &b, 3), Ordering::Greater);
        assert_eq!(Cost::compare(&a, 3, &b, 7), Ordering::Less);
    }

    #[test]
    fn infinity_loses_to_everything() {
        let best = Cost::scan(1e9);
        assert_eq!(Cost::compare(&best, 9, &Cost::INFINITY, 0), Ordering::Less);
    }

    #[test]
    fn plus_and_times_are_coordinate_wise() {
        let c = Cost::new(1.0, 2.0, 3.0).plus(&Cost::new(10.0, 20.0, 30.0)).times(2.0);
        assert_eq!(c, Cost::new(22.0, 44.0, 66.0));
    }
}
