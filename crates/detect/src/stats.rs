//! Pearson chi-square test for 2x2 contingency tables.
//!
//! One degree of freedom, no continuity correction. The p-value comes from
//! the chi-square survival function, which for 1 dof reduces to
//! `erfc(sqrt(x / 2))`.

/// Pearson chi-square statistic for the 2x2 table
///
/// ```text
///              denied   not denied
///   recent        a         b
///   baseline      c         d
/// ```
///
/// Returns `None` when any marginal total is zero (the statistic is
/// undefined; callers treat that as "no evidence").
pub fn chi_square_2x2(a: u64, b: u64, c: u64, d: u64) -> Option<f64> {
    let (a, b, c, d) = (a as f64, b as f64, c as f64, d as f64);
    let n = a + b + c + d;
    let row1 = a + b;
    let row2 = c + d;
    let col1 = a + c;
    let col2 = b + d;
    if row1 == 0.0 || row2 == 0.0 || col1 == 0.0 || col2 == 0.0 {
        return None;
    }
    let diff = a * d - b * c;
    Some(n * diff * diff / (row1 * row2 * col1 * col2))
}

/// Survival function of the chi-square distribution with 1 dof.
pub fn chi_square_p_value(chi2: f64) -> f64 {
    if chi2 <= 0.0 {
        return 1.0;
    }
    erfc((chi2 / 2.0).sqrt())
}

/// Complementary error function, Abramowitz & Stegun 7.1.26.
/// Max absolute error ~1.5e-7, more than enough for a 0.05 threshold.
fn erfc(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    poly * (-x * x).exp()
}
