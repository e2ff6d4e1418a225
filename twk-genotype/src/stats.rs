//! Per-variant summary statistics computed during RLE packing: minor allele
//! frequency and a Hardy-Weinberg equilibrium p-value.
//!
//! HWE-p here is a chi-squared goodness-of-fit test against Hardy-Weinberg
//! expected genotype proportions, with the chi-squared (1 df) tail
//! probability obtained via its relation to the standard normal distribution
//! rather than an exact test. This is a deliberate simplification (see
//! DESIGN.md) — the production-grade statistical battery is out of scope.

/// Running per-variant counts accumulated while scanning samples left to
/// right during RLE packing.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenotypeCounts {
    pub hom_ref: u64,
    pub het: u64,
    pub hom_alt: u64,
    pub missing: u64,
}

impl GenotypeCounts {
    pub fn observe(&mut self, allele_a: u8, allele_b: u8) {
        use crate::run::{ALLELE_ALT, ALLELE_MISSING, ALLELE_REF};
        match (allele_a, allele_b) {
            (ALLELE_MISSING, _) | (_, ALLELE_MISSING) => self.missing += 1,
            (ALLELE_REF, ALLELE_REF) => self.hom_ref += 1,
            (ALLELE_ALT, ALLELE_ALT) => self.hom_alt += 1,
            _ => self.het += 1,
        }
    }

    pub fn n_called(&self) -> u64 {
        self.hom_ref + self.het + self.hom_alt
    }

    /// Minor allele frequency over called genotypes, `0.0` if none are called.
    pub fn maf(&self) -> f32 {
        let n = self.n_called();
        if n == 0 {
            return 0.0;
        }
        let alt_alleles = 2 * self.hom_alt + self.het;
        let total_alleles = 2 * n;
        let p = alt_alleles as f64 / total_alleles as f64;
        p.min(1.0 - p) as f32
    }

    /// Chi-squared goodness-of-fit p-value against Hardy-Weinberg expected
    /// proportions, via the normal approximation to chi-squared(1 df).
    /// Returns `1.0` (no evidence against HWE) when too few genotypes are
    /// called to form the test.
    pub fn hwe_p(&self) -> f32 {
        let n = self.n_called() as f64;
        if n < 1.0 {
            return 1.0;
        }
        let alt_alleles = 2.0 * self.hom_alt as f64 + self.het as f64;
        let p = alt_alleles / (2.0 * n);
        let q = 1.0 - p;

        let expected = [n * q * q, 2.0 * n * p * q, n * p * p];
        let observed = [self.hom_ref as f64, self.het as f64, self.hom_alt as f64];

        let chi_sq: f64 = expected
            .iter()
            .zip(observed.iter())
            .filter(|(e, _)| **e > 1e-9)
            .map(|(e, o)| (o - e).powi(2) / e)
            .sum();

        chi_sq_1df_p_value(chi_sq) as f32
    }
}

/// Upper-tail p-value for a chi-squared(1 df) statistic: if `X ~ chi2(1)`
/// then `sqrt(X) ~ |Z|` for standard normal `Z`, so `P(X >= x) = 2*(1 -
/// Phi(sqrt(x)))`.
pub fn chi_sq_1df_p_value(chi_sq: f64) -> f64 {
    if chi_sq <= 0.0 {
        return 1.0;
    }
    2.0 * (1.0 - standard_normal_cdf(chi_sq.sqrt()))
}

/// Standard normal CDF via the Abramowitz & Stegun 7.1.26 rational
/// approximation to the error function (max absolute error ~1.5e-7).
pub fn standard_normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maf_of_all_ref_is_zero() {
        let mut counts = GenotypeCounts::default();
        for _ in 0..10 {
            counts.observe(crate::run::ALLELE_REF, crate::run::ALLELE_REF);
        }
        assert_eq!(counts.maf(), 0.0);
    }

    #[test]
    fn maf_is_symmetric_around_half() {
        let mut counts = GenotypeCounts::default();
        for _ in 0..5 {
            counts.observe(crate::run::ALLELE_REF, crate::run::ALLELE_REF);
        }
        for _ in 0..5 {
            counts.observe(crate::run::ALLELE_ALT, crate::run::ALLELE_ALT);
        }
        assert!((counts.maf() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn hwe_p_is_high_under_equilibrium() {
        // p=0.5 HWE-expected proportions over 100 called genotypes: 25/50/25.
        let mut counts = GenotypeCounts::default();
        for _ in 0..25 {
            counts.observe(crate::run::ALLELE_REF, crate::run::ALLELE_REF);
        }
        for _ in 0..50 {
            counts.observe(crate::run::ALLELE_REF, crate::run::ALLELE_ALT);
        }
        for _ in 0..25 {
            counts.observe(crate::run::ALLELE_ALT, crate::run::ALLELE_ALT);
        }
        assert!(counts.hwe_p() > 0.9);
    }

    #[test]
    fn hwe_p_is_low_under_excess_heterozygosity() {
        let mut counts = GenotypeCounts::default();
        for _ in 0..1 {
            counts.observe(crate::run::ALLELE_REF, crate::run::ALLELE_REF);
        }
        for _ in 0..98 {
            counts.observe(crate::run::ALLELE_REF, crate::run::ALLELE_ALT);
        }
        for _ in 0..1 {
            counts.observe(crate::run::ALLELE_ALT, crate::run::ALLELE_ALT);
        }
        assert!(counts.hwe_p() < 0.05);
    }
}
