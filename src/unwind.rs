use crate::scalar::PowField;
use faer_entity::{ComplexField, RealField};

/// Computes $\operatorname{atanh}(y / x)$, taking care of the case where $y / x$ is small.
#[inline]
pub fn atanh2<E: PowField>(y: E, x: E) -> E {
    let z = y.faer_mul(x.faer_inv());
    if z.faer_abs() > E::real_epsilon().faer_sqrt() {
        let half = E::Real::faer_from_f64(0.5);
        x.faer_add(y)
            .faer_mul(x.faer_sub(y).faer_inv())
            .ln()
            .faer_scale_real(half)
    } else {
        let third = E::Real::faer_from_f64(3.0).faer_inv();
        z.faer_add(z.faer_mul(z).faer_mul(z).faer_scale_real(third))
    }
}

/// Returns the unwinding number $\lceil (\operatorname{Im}(z) - \pi) / 2\pi \rceil$ of
/// $z = \log a - \log b$, where `log_a` and `log_b` are principal logarithms.
///
/// This is the integer $u$ such that $\log(a / b) = \log a - \log b - 2 \pi i u$. It is always
/// zero for real types.
#[inline]
pub fn unwinding_number<E: PowField>(log_a: E, log_b: E) -> E::Real {
    let pi = E::real_pi();
    let two_pi = pi.faer_add(pi);
    E::real_ceil(
        log_a
            .faer_sub(log_b)
            .faer_imag()
            .faer_sub(pi)
            .faer_div(two_pi),
    )
}

/// Returns $\operatorname{atanh2}(b - a, b + a) + i \pi u$, the argument of the hyperbolic sine
/// in the closed form of the superdiagonal entry of $\begin{pmatrix} a & x \\ 0 & b \end{pmatrix}^p$.
#[inline]
pub fn unwinder<E: PowField>(b: E, a: E, unwinding_number: E::Real) -> E {
    atanh2(b.faer_sub(a), b.faer_add(a))
        .faer_add(E::from_imag(E::real_pi().faer_mul(unwinding_number)))
}
