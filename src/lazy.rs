use crate::{power::PowerComputable, scalar::PowField, PowError};
use dyn_stack::{GlobalPodBuffer, PodStack};
use equator::assert;
use faer::{get_global_parallelism, Mat, MatMut, MatRef, Parallelism};
use faer_entity::ComplexField;

/// Deferred value of $A^p$.
///
/// Nothing is computed until the expression is evaluated, either into an existing matrix with
/// [`Self::eval_into`] or into a new one with [`Self::eval`]. Evaluation uses the global
/// parallelism setting of `faer` unless overridden with [`Self::with_parallelism`], and allocates
/// its own workspace.
pub struct PowExpr<'a, P, E: ComplexField> {
    pow: &'a P,
    p: E::Real,
    parallelism: Parallelism<'static>,
}

impl<P, E: ComplexField> Copy for PowExpr<'_, P, E> {}
impl<P, E: ComplexField> Clone for PowExpr<'_, P, E> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, E: ComplexField> core::fmt::Debug for PowExpr<'_, P, E>
where
    E::Real: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PowExpr")
            .field("p", &self.p)
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl<'a, P: PowerComputable<E>, E: PowField> PowExpr<'a, P, E> {
    /// Creates the expression $A^p$, where $A$ is the matrix behind `pow`.
    #[inline]
    pub fn new(pow: &'a P, p: E::Real) -> Self {
        Self {
            pow,
            p,
            parallelism: get_global_parallelism(),
        }
    }

    /// Returns a copy of `self` that is evaluated with the given parallelism.
    #[inline]
    pub fn with_parallelism(self, parallelism: Parallelism<'static>) -> Self {
        Self {
            parallelism,
            ..self
        }
    }

    /// Returns the exponent.
    #[inline]
    pub fn exponent(&self) -> E::Real {
        self.p
    }

    /// Returns the number of rows of the result.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.pow.nrows()
    }

    /// Returns the number of columns of the result.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.pow.ncols()
    }

    /// Evaluates the expression and stores the result in `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` does not have the same dimensions as the result.
    #[track_caller]
    pub fn eval_into(&self, out: MatMut<'_, E>) -> Result<(), PowError> {
        assert!(all(out.nrows() == self.nrows(), out.ncols() == self.ncols()));

        let mut mem = GlobalPodBuffer::new(self.pow.compute_req(self.parallelism).unwrap());
        self.pow
            .compute(out, self.p, self.parallelism, PodStack::new(&mut mem))
    }

    /// Evaluates the expression into a new matrix.
    pub fn eval(&self) -> Result<Mat<E>, PowError> {
        let mut out = Mat::<E>::zeros(self.nrows(), self.ncols());
        self.eval_into(out.as_mut())?;
        Ok(out)
    }
}

impl<'a, 'b, P: PowerComputable<E>, E: PowField> core::ops::Mul<MatRef<'b, E>>
    for PowExpr<'a, P, E>
where
    'a: 'b,
{
    type Output = PowProduct<'b, P, E>;

    /// Returns the deferred product $A^p B$, where $B$ is `rhs`.
    ///
    /// # Panics
    ///
    /// Panics if `rhs.nrows() != self.ncols()`.
    #[track_caller]
    #[inline]
    fn mul(self, rhs: MatRef<'b, E>) -> Self::Output {
        PowProduct::new(self.pow, rhs, self.p).with_parallelism(self.parallelism)
    }
}

/// Deferred value of $A^p B$.
///
/// When $B$ has few columns, the power is applied to $B$ without forming $A^p$ whenever the
/// evaluator allows it.
pub struct PowProduct<'a, P, E: ComplexField> {
    pow: &'a P,
    rhs: MatRef<'a, E>,
    p: E::Real,
    parallelism: Parallelism<'static>,
}

impl<P, E: ComplexField> Copy for PowProduct<'_, P, E> {}
impl<P, E: ComplexField> Clone for PowProduct<'_, P, E> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, E: ComplexField> core::fmt::Debug for PowProduct<'_, P, E>
where
    E::Real: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PowProduct")
            .field("p", &self.p)
            .field("rhs_nrows", &self.rhs.nrows())
            .field("rhs_ncols", &self.rhs.ncols())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl<'a, P: PowerComputable<E>, E: PowField> PowProduct<'a, P, E> {
    /// Creates the product $A^p B$, where $A$ is the matrix behind `pow` and $B$ is `rhs`.
    ///
    /// # Panics
    ///
    /// Panics if `rhs.nrows() != pow.ncols()`.
    #[track_caller]
    #[inline]
    pub fn new(pow: &'a P, rhs: MatRef<'a, E>, p: E::Real) -> Self {
        assert!(pow.ncols() == rhs.nrows());
        Self {
            pow,
            rhs,
            p,
            parallelism: get_global_parallelism(),
        }
    }

    /// Returns a copy of `self` that is evaluated with the given parallelism.
    #[inline]
    pub fn with_parallelism(self, parallelism: Parallelism<'static>) -> Self {
        Self {
            parallelism,
            ..self
        }
    }

    /// Returns the exponent.
    #[inline]
    pub fn exponent(&self) -> E::Real {
        self.p
    }

    /// Returns the number of rows of the result.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.pow.nrows()
    }

    /// Returns the number of columns of the result.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.rhs.ncols()
    }

    /// Evaluates the product and stores the result in `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` does not have the same dimensions as the result.
    #[track_caller]
    pub fn eval_into(&self, out: MatMut<'_, E>) -> Result<(), PowError> {
        assert!(all(out.nrows() == self.nrows(), out.ncols() == self.ncols()));

        let mut mem = GlobalPodBuffer::new(
            self.pow
                .compute_on_req(self.rhs.ncols(), self.parallelism)
                .unwrap(),
        );
        self.pow.compute_on(
            out,
            self.rhs,
            self.p,
            self.parallelism,
            PodStack::new(&mut mem),
        )
    }

    /// Evaluates the product into a new matrix.
    pub fn eval(&self) -> Result<Mat<E>, PowError> {
        let mut out = Mat::<E>::zeros(self.nrows(), self.ncols());
        self.eval_into(out.as_mut())?;
        Ok(out)
    }
}
