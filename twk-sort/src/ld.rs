//! Pairwise linkage-disequilibrium statistics between two variants' decoded
//! genotypes.
//!
//! Per the stated scope, this computes r² with the textbook dosage
//! correlation formula, extends it to `D'` via the standard
//! `r = D / sqrt(p(1-p)q(1-q))` identity, and derives `chi_sq`/`p_value`
//! from r² via the same normal approximation
//! [`twk_genotype::stats::chi_sq_1df_p_value`] uses for HWE. None of this
//! attempts the exact-test statistical battery (Fisher's exact test, a
//! contingency-table χ² with a continuity correction) spec.md excludes.

use twk_genotype::stats::chi_sq_1df_p_value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LdStats {
    pub r2: f32,
    pub d_prime: f32,
    pub chi_sq: f32,
    pub p_value: f32,
}

/// Compute LD statistics between two equal-length dosage vectors (one entry
/// per sample, `NaN` for missing calls). Samples missing in either vector are
/// excluded from every moment sum, matching a pairwise-complete-observations
/// correlation.
pub fn compute(dosages_a: &[f32], dosages_b: &[f32]) -> LdStats {
    let mut n = 0f64;
    let mut sum_a = 0f64;
    let mut sum_b = 0f64;
    let mut sum_ab = 0f64;
    let mut sum_aa = 0f64;
    let mut sum_bb = 0f64;

    for (&a, &b) in dosages_a.iter().zip(dosages_b) {
        if a.is_nan() || b.is_nan() {
            continue;
        }
        let (a, b) = (a as f64, b as f64);
        n += 1.0;
        sum_a += a;
        sum_b += b;
        sum_ab += a * b;
        sum_aa += a * a;
        sum_bb += b * b;
    }

    if n < 2.0 {
        return LdStats { r2: 0.0, d_prime: 0.0, chi_sq: 0.0, p_value: 1.0 };
    }

    let mean_a = sum_a / n;
    let mean_b = sum_b / n;
    let cov = sum_ab / n - mean_a * mean_b;
    let var_a = sum_aa / n - mean_a * mean_a;
    let var_b = sum_bb / n - mean_b * mean_b;
    let denom = (var_a * var_b).sqrt();
    let r = if denom > 1e-12 { cov / denom } else { 0.0 };
    let r2 = r * r;

    // Dosage average over 2 copies per sample approximates allele frequency.
    let p = (mean_a / 2.0).clamp(0.0, 1.0);
    let q = (mean_b / 2.0).clamp(0.0, 1.0);
    let d = r * (p * (1.0 - p) * q * (1.0 - q)).sqrt();
    let d_max = if d >= 0.0 {
        (p * (1.0 - q)).min((1.0 - p) * q)
    } else {
        (p * q).min((1.0 - p) * (1.0 - q))
    };
    let d_prime = if d_max > 1e-12 { (d / d_max).clamp(-1.0, 1.0) } else { 0.0 };

    let chi_sq = n * r2;
    let p_value = chi_sq_1df_p_value(chi_sq);

    LdStats { r2: r2 as f32, d_prime: d_prime as f32, chi_sq: chi_sq as f32, p_value: p_value as f32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_dosages_give_r2_of_one() {
        let a = vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0];
        let stats = compute(&a, &a);
        assert!((stats.r2 - 1.0).abs() < 1e-5);
        assert!(stats.p_value < 0.05);
    }

    #[test]
    fn unrelated_dosages_give_small_r2() {
        let a = vec![0.0, 0.0, 2.0, 2.0, 0.0, 2.0];
        let b = vec![2.0, 0.0, 0.0, 2.0, 2.0, 0.0];
        let stats = compute(&a, &b);
        assert!(stats.r2 < 0.3);
    }

    #[test]
    fn missing_calls_are_excluded_pairwise() {
        let a = vec![0.0, 1.0, 2.0, f32::NAN];
        let b = vec![0.0, 1.0, 2.0, 2.0];
        let stats = compute(&a, &b);
        assert!((stats.r2 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn too_few_complete_pairs_yields_zero_stats() {
        let a = vec![f32::NAN, 1.0];
        let b = vec![0.0, f32::NAN];
        let stats = compute(&a, &b);
        assert_eq!(stats.r2, 0.0);
        assert_eq!(stats.p_value, 1.0);
    }
}
