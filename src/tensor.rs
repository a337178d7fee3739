//! Connectivity tensors before and after finalisation.
//!
//! Every metric produces a [`RawTensor`] `[nSrc × nTgt × nTime × nFreq]`:
//! the quantity that can be averaged across trials. [`RawTensor::finalize`]
//! turns it into the stored measure ([`Values`]).
use ndarray::{Array, Array4, Dimension, Ix4, Zip};
use rustfft::num_complex::Complex64;

use crate::error::{ConnError, Result};

/// Largest |Re(PLV)| used in the ciPLV denominator.
const MAX_REAL_PLV: f64 = 0.99999;

/// Accumulable per-trial connectivity.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTensor {
    Real(Array4<f64>),
    Complex(Array4<Complex64>),
    /// Numerator and denominator averaged separately (wPLI).
    Ratio { num: Array4<f64>, den: Array4<f64> },
}

/// How a complex raw tensor becomes a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// Keep real tensors real and complex tensors complex.
    AsIs,
    /// `|z|`
    Magnitude,
    /// `|Im z| / √(1 − Re z²)`
    CorrectedImaginary,
}

impl RawTensor {
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        match self {
            Self::Real(a) => a.dim(),
            Self::Complex(a) => a.dim(),
            Self::Ratio { num, .. } => num.dim(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Real(_) => "real",
            Self::Complex(_) => "complex",
            Self::Ratio { .. } => "ratio",
        }
    }

    /// Replace NaN and ±inf with zero.
    pub fn zero_non_finite(&mut self) {
        match self {
            Self::Real(a) => zero_real(a),
            Self::Complex(a) => a.mapv_inplace(|v| if v.is_finite() { v } else { Complex64::default() }),
            Self::Ratio { num, den } => {
                zero_real(num);
                zero_real(den);
            }
        }
    }

    pub fn scale(&mut self, s: f64) {
        match self {
            Self::Real(a) => a.mapv_inplace(|v| v * s),
            Self::Complex(a) => a.mapv_inplace(|v| v * s),
            Self::Ratio { num, den } => {
                num.mapv_inplace(|v| v * s);
                den.mapv_inplace(|v| v * s);
            }
        }
    }

    /// `self += s · other`. Both tensors must have the same variant and shape.
    pub fn scaled_add(&mut self, s: f64, other: &RawTensor) -> Result<()> {
        if self.dim() != other.dim() {
            return Err(ConnError::shape(format!(
                "cannot average connectivity of shape {:?} into {:?}",
                other.dim(),
                self.dim()
            )));
        }
        match (self, other) {
            (Self::Real(a), Self::Real(b)) => add_into(a, b, s),
            (Self::Complex(a), Self::Complex(b)) => {
                Zip::from(a).and(b).for_each(|x, &y| *x += y * s)
            }
            (Self::Ratio { num, den }, Self::Ratio { num: n2, den: d2 }) => {
                add_into(num, n2, s);
                add_into(den, d2, s);
            }
            (a, b) => {
                return Err(ConnError::shape(format!(
                    "cannot average {} connectivity into {}",
                    b.kind(),
                    a.kind()
                )));
            }
        }
        Ok(())
    }

    /// Swap the source and target axes.
    pub fn transpose_pairs(self) -> Self {
        let t = |a: Array4<f64>| a.permuted_axes([1, 0, 2, 3]).as_standard_layout().into_owned();
        match self {
            Self::Real(a) => Self::Real(t(a)),
            Self::Complex(a) => {
                Self::Complex(a.permuted_axes([1, 0, 2, 3]).as_standard_layout().into_owned())
            }
            Self::Ratio { num, den } => Self::Ratio { num: t(num), den: t(den) },
        }
    }

    /// Turn the raw quantity into the stored measure. Non-finite results
    /// are zeroed.
    pub fn finalize(self, finish: Finish) -> Values<Ix4> {
        let mut out = match (self, finish) {
            (Self::Real(a), _) => Values::Real(a),
            (Self::Ratio { num, den }, _) => {
                let mut v = num;
                Zip::from(&mut v).and(&den).for_each(|n, &d| *n = n.abs() / d);
                Values::Real(v)
            }
            (Self::Complex(a), Finish::AsIs) => Values::Complex(a),
            (Self::Complex(a), Finish::Magnitude) => Values::Real(a.mapv(|z| z.norm())),
            (Self::Complex(a), Finish::CorrectedImaginary) => Values::Real(a.mapv(|z| {
                let re = z.re.clamp(-MAX_REAL_PLV, MAX_REAL_PLV);
                z.im.abs() / (1.0 - re * re).sqrt()
            })),
        };
        out.zero_non_finite();
        out
    }
}

fn zero_real<D: Dimension>(a: &mut Array<f64, D>) {
    a.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
}

fn add_into(a: &mut Array4<f64>, b: &Array4<f64>, s: f64) {
    Zip::from(a).and(b).for_each(|x, &y| *x += y * s);
}

/// Stored connectivity values.
#[derive(Debug, Clone, PartialEq)]
pub enum Values<D: Dimension> {
    Real(Array<f64, D>),
    Complex(Array<Complex64, D>),
}

impl<D: Dimension> Values<D> {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Real(a) => a.shape(),
            Self::Complex(a) => a.shape(),
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Self::Complex(_))
    }

    pub fn as_real(&self) -> Option<&Array<f64, D>> {
        match self {
            Self::Real(a) => Some(a),
            Self::Complex(_) => None,
        }
    }

    pub fn zero_non_finite(&mut self) {
        match self {
            Self::Real(a) => zero_real(a),
            Self::Complex(a) => {
                a.mapv_inplace(|v| if v.is_finite() { v } else { Complex64::default() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_finalizes_to_abs_quotient() {
        let num = Array4::from_elem((1, 1, 1, 1), -0.2);
        let den = Array4::from_elem((1, 1, 1, 1), 0.4);
        let v = RawTensor::Ratio { num, den }.finalize(Finish::AsIs);
        approx::assert_abs_diff_eq!(v.as_real().unwrap()[[0, 0, 0, 0]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn zero_denominator_is_zeroed() {
        let num = Array4::zeros((1, 1, 1, 1));
        let den = Array4::zeros((1, 1, 1, 1));
        let v = RawTensor::Ratio { num, den }.finalize(Finish::AsIs);
        assert_eq!(v.as_real().unwrap()[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn corrected_imaginary_clamps_real_part() {
        let z = Array4::from_elem((1, 1, 1, 1), Complex64::new(1.0, 0.0));
        let v = RawTensor::Complex(z).finalize(Finish::CorrectedImaginary);
        assert_eq!(v.as_real().unwrap()[[0, 0, 0, 0]], 0.0);

        let z = Array4::from_elem((1, 1, 1, 1), Complex64::new(0.6, 0.8));
        let v = RawTensor::Complex(z).finalize(Finish::CorrectedImaginary);
        approx::assert_abs_diff_eq!(v.as_real().unwrap()[[0, 0, 0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_variants_refuse_to_average() {
        let mut a = RawTensor::Real(Array4::zeros((1, 1, 1, 1)));
        let b = RawTensor::Complex(Array4::zeros((1, 1, 1, 1)));
        assert!(matches!(a.scaled_add(1.0, &b), Err(ConnError::ShapeMismatch(_))));
        let c = RawTensor::Real(Array4::zeros((2, 1, 1, 1)));
        assert!(a.scaled_add(1.0, &c).is_err());
    }

    #[test]
    fn transpose_swaps_source_and_target() {
        let a = Array4::from_shape_fn((2, 3, 1, 1), |(i, j, _, _)| (10 * i + j) as f64);
        let RawTensor::Real(t) = RawTensor::Real(a).transpose_pairs() else { unreachable!() };
        assert_eq!(t.dim(), (3, 2, 1, 1));
        assert_eq!(t[[2, 1, 0, 0]], 12.0);
    }

    #[test]
    fn non_finite_values_become_zero() {
        let mut r = RawTensor::Real(Array4::from_elem((1, 2, 1, 1), f64::NAN));
        r.zero_non_finite();
        assert_eq!(r, RawTensor::Real(Array4::zeros((1, 2, 1, 1))));
    }
}
