//! Real powers of triangular matrices.
//!
//! Given an upper triangular matrix $T$ and a real exponent $p$, this crate computes $T^p$ using
//! the Schur-Padé algorithm of Higham and Lin: the matrix is brought close to the identity by
//! repeated square roots, a Padé approximant of $(I - X)^p$ is evaluated there, and the result is
//! squared back up while the diagonal and first superdiagonal are recomputed exactly from closed
//! form expressions.
//!
//! The entry points are:
//! - [`TriangularPowerAtomic`], the low level kernel, valid for any real exponent,
//! - [`TriangularPower`], which splits the exponent into an integer part handled by binary
//!   powering and a fractional part handled by the kernel,
//! - [`MatrixPower`], for general square matrices, which applies the above to the triangular
//!   factor of the complex Schur decomposition,
//! - [`PowExpr`] and [`PowProduct`], deferred values for $A^p$ and $A^p B$.
//!
//! # Memory allocation
//! As in `faer`, the low level functions take a [`PodStack`](dyn_stack::PodStack) for their
//! temporary storage, and each of them has a companion function ending in `_req` that returns the
//! corresponding memory requirements. The deferred expressions allocate what they need.
//!
//! # Example
//! ```
//! use faer::mat;
//! use faer_matpow::{PowerComputable, TriangularPowerAtomic};
//!
//! let t = mat![[4.0f64, 1.0], [0.0, 9.0]];
//! let pow = TriangularPowerAtomic::new(t.as_ref());
//!
//! let sqrt = pow.pow(0.5).eval().unwrap();
//! assert!((sqrt.read(0, 0) - 2.0).abs() < 1e-12);
//! assert!((sqrt.read(1, 1) - 3.0).abs() < 1e-12);
//! assert!((sqrt.read(0, 1) - 0.2).abs() < 1e-12);
//! ```

#![allow(clippy::too_many_arguments)]
#![allow(non_snake_case)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use dyn_stack;
pub use faer;
pub use reborrow;

pub use faer::{MatMut, MatRef, Parallelism};
pub use faer_entity::{ComplexField, Entity, RealField};

mod ops;

/// Scalar types supported by the power kernels.
pub mod scalar;

/// Padé approximation of $(I - X)^p$ and degree selection.
pub mod pade;

/// Branch unwinding for the close eigenvalue closed form.
pub mod unwind;

/// Principal square root of an upper triangular matrix.
pub mod sqrt;

/// Integer powers through binary powering.
pub mod binary;

/// The triangular power kernel.
pub mod atomic;

/// Power strategies and the [`PowerComputable`] trait.
pub mod power;

/// Deferred power expressions and products.
pub mod lazy;

/// Powers of general square matrices through the complex Schur decomposition.
pub mod general;

pub use atomic::{PowInfo, PowParams, TriangularPowerAtomic};
pub use binary::{binary_powering_cost, BinaryPoweringCost};
pub use general::MatrixPower;
pub use lazy::{PowExpr, PowProduct};
pub use pade::{pade_degree, Precision};
pub use power::{PowerComputable, TriangularPower};
pub use scalar::PowField;

/// This error signifies that the power could not be computed because the input could not be
/// brought close enough to the identity by repeated square roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PowError {
    /// The square root iteration did not converge, either because the iteration limit was
    /// reached or because the iterates stopped being finite.
    NumericalFailure {
        /// Number of square roots taken before giving up.
        square_roots: usize,
    },
}

impl core::fmt::Display for PowError {
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PowError::NumericalFailure { square_roots } => write!(
                f,
                "matrix power did not converge after {square_roots} square roots",
            ),
        }
    }
}

impl std::error::Error for PowError {}
