// ---------- normal distribution helpers (no external dep) ----------

/// Standard normal cumulative distribution function.
///
/// Uses the Abramowitz & Stegun 7.1.26 approximation of `erf`
/// (absolute error below 1.5e-7).
pub fn norm_cdf(x: f64) -> f64 {
    if x >= 8.0 {
        return 1.0;
    }
    if x <= -8.0 {
        return 0.0;
    }
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let a1 = 0.254829592_f64;
    let a2 = -0.284496736_f64;
    let a3 = 1.421413741_f64;
    let a4 = -1.453152027_f64;
    let a5 = 1.061405429_f64;
    let p = 0.3275911_f64;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x_abs = x.abs();
    let t = 1.0 / (1.0 + p * x_abs);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x_abs * x_abs).exp();

    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdf_reference_values() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.0) - 0.841_344_746).abs() < 1e-6);
        assert!((norm_cdf(-1.959_964) - 0.025).abs() < 1e-6);
        assert_eq!(norm_cdf(9.0), 1.0);
        assert_eq!(norm_cdf(-9.0), 0.0);
    }

    #[test]
    fn cdf_is_monotone() {
        let values: Vec<f64> = (-40..=40).map(|i| norm_cdf(i as f64 * 0.1)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }
}
