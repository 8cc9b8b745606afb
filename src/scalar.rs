use faer::complex_native::{c32, c64};
use faer_entity::ComplexField;
use num_complex::Complex;

/// Scalar type for which real matrix powers can be computed.
///
/// Extends [`ComplexField`] with the elementary functions needed by the closed form expressions
/// of the diagonal and first superdiagonal. For complex types, every function uses the principal
/// branch.
pub trait PowField: ComplexField {
    /// Number of significant bits of [`ComplexField::Real`], including the implicit leading bit.
    const MANTISSA_DIGITS: u32;

    /// Complex type with the same real type, in which the Schur form of a general matrix is
    /// computed.
    type Complex: PowField<Real = Self::Real>;

    /// Converts `self` to the complex type.
    fn to_complex(self) -> Self::Complex;
    /// Returns the real part of `value` for real types, and `value` itself for complex types.
    fn from_complex(value: Self::Complex) -> Self;

    /// Returns `self` raised to the real power `p`.
    fn pow_real(self, p: Self::Real) -> Self;
    /// Returns the natural logarithm of `self`.
    fn ln(self) -> Self;
    /// Returns $e^{\mathrm{self}}$.
    fn exp(self) -> Self;
    /// Returns the hyperbolic sine of `self`.
    fn sinh(self) -> Self;
    /// Returns $i \cdot \mathrm{imag}$, or zero for real types.
    fn from_imag(imag: Self::Real) -> Self;

    /// Returns $\pi$.
    fn real_pi() -> Self::Real;
    /// Returns the machine epsilon of the real type.
    fn real_epsilon() -> Self::Real;
    /// Returns the smallest positive normal value of the real type.
    fn real_min_positive() -> Self::Real;
    /// Rounds `value` towards positive infinity.
    fn real_ceil(value: Self::Real) -> Self::Real;
    /// Rounds `value` towards negative infinity.
    fn real_floor(value: Self::Real) -> Self::Real;
    /// Converts `value` to `f64`, rounding if needed.
    fn real_to_f64(value: Self::Real) -> f64;
}

macro_rules! impl_real {
    ($ty: ident, $cplx: ident) => {
        impl PowField for $ty {
            const MANTISSA_DIGITS: u32 = $ty::MANTISSA_DIGITS;

            type Complex = $cplx;

            #[inline]
            fn to_complex(self) -> Self::Complex {
                $cplx { re: self, im: 0.0 }
            }
            #[inline]
            fn from_complex(value: Self::Complex) -> Self {
                value.re
            }

            #[inline]
            fn pow_real(self, p: Self::Real) -> Self {
                $ty::powf(self, p)
            }
            #[inline]
            fn ln(self) -> Self {
                $ty::ln(self)
            }
            #[inline]
            fn exp(self) -> Self {
                $ty::exp(self)
            }
            #[inline]
            fn sinh(self) -> Self {
                $ty::sinh(self)
            }
            #[inline]
            fn from_imag(_imag: Self::Real) -> Self {
                0.0
            }

            #[inline]
            fn real_pi() -> Self::Real {
                core::$ty::consts::PI
            }
            #[inline]
            fn real_epsilon() -> Self::Real {
                $ty::EPSILON
            }
            #[inline]
            fn real_min_positive() -> Self::Real {
                $ty::MIN_POSITIVE
            }
            #[inline]
            fn real_ceil(value: Self::Real) -> Self::Real {
                $ty::ceil(value)
            }
            #[inline]
            fn real_floor(value: Self::Real) -> Self::Real {
                $ty::floor(value)
            }
            #[inline]
            fn real_to_f64(value: Self::Real) -> f64 {
                value as f64
            }
        }
    };
}

macro_rules! impl_complex {
    ($ty: ident, $real: ident) => {
        impl PowField for $ty {
            const MANTISSA_DIGITS: u32 = $real::MANTISSA_DIGITS;

            type Complex = $ty;

            #[inline]
            fn to_complex(self) -> Self::Complex {
                self
            }
            #[inline]
            fn from_complex(value: Self::Complex) -> Self {
                value
            }

            #[inline]
            fn pow_real(self, p: Self::Real) -> Self {
                from_num(to_num(self).powf(p))
            }
            #[inline]
            fn ln(self) -> Self {
                from_num(to_num(self).ln())
            }
            #[inline]
            fn exp(self) -> Self {
                from_num(to_num(self).exp())
            }
            #[inline]
            fn sinh(self) -> Self {
                from_num(to_num(self).sinh())
            }
            #[inline]
            fn from_imag(imag: Self::Real) -> Self {
                $ty { re: 0.0, im: imag }
            }

            #[inline]
            fn real_pi() -> Self::Real {
                core::$real::consts::PI
            }
            #[inline]
            fn real_epsilon() -> Self::Real {
                $real::EPSILON
            }
            #[inline]
            fn real_min_positive() -> Self::Real {
                $real::MIN_POSITIVE
            }
            #[inline]
            fn real_ceil(value: Self::Real) -> Self::Real {
                $real::ceil(value)
            }
            #[inline]
            fn real_floor(value: Self::Real) -> Self::Real {
                $real::floor(value)
            }
            #[inline]
            fn real_to_f64(value: Self::Real) -> f64 {
                value as f64
            }
        }

        impl ToNum for $ty {
            type Component = $real;

            #[inline(always)]
            fn to_num(self) -> Complex<$real> {
                Complex::new(self.re, self.im)
            }
            #[inline(always)]
            fn from_num(value: Complex<$real>) -> Self {
                $ty {
                    re: value.re,
                    im: value.im,
                }
            }
        }
    };
}

// the native complex types store their components the same way as `num_complex`, but the
// elementary functions are only implemented on the latter
trait ToNum {
    type Component;
    fn to_num(self) -> Complex<Self::Component>;
    fn from_num(value: Complex<Self::Component>) -> Self;
}

#[inline(always)]
fn to_num<T: ToNum>(value: T) -> Complex<T::Component> {
    value.to_num()
}

#[inline(always)]
fn from_num<T: ToNum>(value: Complex<T::Component>) -> T {
    T::from_num(value)
}

impl_real!(f32, c32);
impl_real!(f64, c64);
impl_complex!(c32, f32);
impl_complex!(c64, f64);
