use crate::{
    atomic::PowParams,
    ops,
    power::{PowerComputable, TriangularPower},
    scalar::PowField,
    PowError,
};
use dyn_stack::{GlobalPodBuffer, PodStack, SizeOverflow, StackReq};
use equator::assert;
use faer::{
    get_global_parallelism,
    linalg::{
        evd::{hessenberg, hessenberg_cplx_evd, EvdParams},
        householder::{
            apply_block_householder_sequence_on_the_right_in_place_req,
            apply_block_householder_sequence_on_the_right_in_place_with_conj,
        },
        matmul::matmul_with_conj,
        qr::no_pivoting::compute::recommended_blocksize,
        temp_mat_req, temp_mat_uninit,
    },
    Conj, Mat, MatMut, MatRef, Parallelism,
};
use faer_entity::ComplexField;
use reborrow::*;

fn complex_schur_in_place_req<E: ComplexField>(
    dim: usize,
    parallelism: Parallelism,
    params: EvdParams,
) -> Result<StackReq, SizeOverflow> {
    if dim <= 1 {
        return Ok(StackReq::empty());
    }
    let n = dim;
    let householder_blocksize = recommended_blocksize::<E>(n - 1, n - 1);
    StackReq::try_any_of([
        StackReq::try_all_of([
            temp_mat_req::<E>(householder_blocksize, n - 1)?,
            StackReq::try_any_of([
                hessenberg::make_hessenberg_in_place_req::<E>(
                    n,
                    householder_blocksize,
                    parallelism,
                )?,
                apply_block_householder_sequence_on_the_right_in_place_req::<E>(
                    n - 1,
                    householder_blocksize,
                    n,
                )?,
            ])?,
        ])?,
        StackReq::try_all_of([
            temp_mat_req::<E>(n, 1)?,
            hessenberg_cplx_evd::multishift_qr_req::<E>(n, n, true, true, parallelism, params)?,
        ])?,
    ])
}

/// Overwrites the complex matrix $A$ stored in `matrix` with the upper triangular factor $T$ of
/// its Schur decomposition $A = Z T Z^H$, and stores the unitary factor $Z$ in `schur_vectors`.
fn complex_schur_in_place<E: PowField>(
    matrix: MatMut<'_, E>,
    schur_vectors: MatMut<'_, E>,
    parallelism: Parallelism,
    stack: PodStack<'_>,
    params: EvdParams,
) {
    let n = matrix.nrows();
    assert!(all(
        matrix.ncols() == n,
        schur_vectors.nrows() == n,
        schur_vectors.ncols() == n,
    ));

    let mut h = matrix;
    let mut z = schur_vectors;
    let mut stack = stack;

    ops::set_identity(z.rb_mut());
    if n <= 1 {
        return;
    }

    let householder_blocksize = recommended_blocksize::<E>(n - 1, n - 1);
    {
        let (mut householder, mut stack) =
            temp_mat_uninit::<E>(n - 1, householder_blocksize, stack.rb_mut());

        hessenberg::make_hessenberg_in_place(
            h.rb_mut(),
            householder.rb_mut(),
            parallelism,
            stack.rb_mut(),
        );
        apply_block_householder_sequence_on_the_right_in_place_with_conj(
            h.rb().submatrix(1, 0, n - 1, n - 1),
            householder.rb().transpose(),
            Conj::No,
            z.rb_mut().submatrix_mut(1, 1, n - 1, n - 1),
            parallelism,
            stack.rb_mut(),
        );
    }

    // the householder vectors are stored below the subdiagonal
    for j in 0..n {
        for i in j + 2..n {
            h.write(i, j, E::faer_zero());
        }
    }

    let (mut eigenvalues, stack) = temp_mat_uninit::<E>(n, 1, stack);
    hessenberg_cplx_evd::multishift_qr(
        true,
        h.rb_mut(),
        Some(z.rb_mut()),
        eigenvalues.rb_mut().col_mut(0),
        0,
        n,
        E::real_epsilon(),
        E::real_min_positive(),
        parallelism,
        stack,
        params,
    );

    ops::zero_strictly_lower(h);
}

fn copy_from_complex<E: PowField>(dst: MatMut<'_, E>, src: MatRef<'_, E::Complex>) {
    let mut dst = dst;
    for j in 0..dst.ncols() {
        for i in 0..dst.nrows() {
            dst.write(i, j, E::from_complex(src.read(i, j)));
        }
    }
}

/// Evaluator of real powers of a general square matrix.
///
/// The complex Schur decomposition $A = U T U^H$ is computed once, when the evaluator is created.
/// Powers are then obtained from those of the triangular factor, $A^p = U T^p U^H$, using
/// [`TriangularPower`].
///
/// Real matrices are decomposed in the corresponding complex type, and the real part of the
/// result is returned. This is the principal power as long as the matrix has no eigenvalue on the
/// closed negative real axis.
#[derive(Clone, Debug)]
pub struct MatrixPower<E: PowField> {
    schur_form: Mat<E::Complex>,
    schur_vectors: Mat<E::Complex>,
    params: PowParams,
}

impl<E: PowField> MatrixPower<E> {
    /// Computes the Schur decomposition of `matrix` and returns an evaluator for its powers.
    ///
    /// The decomposition uses the global parallelism setting of `faer`. If `matrix` has non-finite
    /// entries, the stored Schur form is filled with `NaN`s.
    ///
    /// # Panics
    ///
    /// Panics if `matrix` is not square.
    #[track_caller]
    pub fn new(matrix: MatRef<'_, E>) -> Self {
        assert!(matrix.nrows() == matrix.ncols());
        let n = matrix.nrows();

        let mut schur_form =
            Mat::<E::Complex>::from_fn(n, n, |i, j| matrix.read(i, j).to_complex());
        let mut schur_vectors = Mat::<E::Complex>::zeros(n, n);

        if matrix.is_all_finite() {
            let parallelism = get_global_parallelism();
            let params = EvdParams::default();
            let mut mem = GlobalPodBuffer::new(
                complex_schur_in_place_req::<E::Complex>(n, parallelism, params).unwrap(),
            );
            complex_schur_in_place(
                schur_form.as_mut(),
                schur_vectors.as_mut(),
                parallelism,
                PodStack::new(&mut mem),
                params,
            );
        } else {
            schur_form.as_mut().fill(E::Complex::faer_nan());
            ops::set_identity(schur_vectors.as_mut());
        }

        Self {
            schur_form,
            schur_vectors,
            params: PowParams::default(),
        }
    }

    /// Returns `self` with the given tuning parameters for the triangular kernel.
    #[inline]
    pub fn with_params(self, params: PowParams) -> Self {
        Self { params, ..self }
    }

    /// Returns the tuning parameters.
    #[inline]
    pub fn params(&self) -> PowParams {
        self.params
    }

    /// Returns the upper triangular factor $T$ of the Schur decomposition.
    #[inline]
    pub fn schur_form(&self) -> MatRef<'_, E::Complex> {
        self.schur_form.as_ref()
    }

    /// Returns the unitary factor $U$ of the Schur decomposition.
    #[inline]
    pub fn schur_vectors(&self) -> MatRef<'_, E::Complex> {
        self.schur_vectors.as_ref()
    }

    #[inline]
    fn triangular(&self) -> TriangularPower<'_, E::Complex> {
        TriangularPower::new(self.schur_form.as_ref()).with_params(self.params)
    }
}

impl<E: PowField> PowerComputable<E> for MatrixPower<E> {
    #[inline]
    fn nrows(&self) -> usize {
        self.schur_form.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.schur_form.ncols()
    }

    fn compute_req(&self, parallelism: Parallelism) -> Result<StackReq, SizeOverflow> {
        let n = self.nrows();
        let mat = temp_mat_req::<E::Complex>(n, n)?;
        StackReq::try_all_of([
            mat,
            StackReq::try_any_of([self.triangular().compute_req(parallelism)?, mat])?,
        ])
    }

    #[track_caller]
    fn compute(
        &self,
        out: MatMut<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<(), PowError> {
        let n = self.nrows();
        assert!(all(out.nrows() == n, out.ncols() == n));

        let u = self.schur_vectors.as_ref();
        let one = E::Complex::faer_one();

        let (mut pow, mut stack) = temp_mat_uninit::<E::Complex>(n, n, stack);
        self.triangular()
            .compute(pow.rb_mut(), p, parallelism, stack.rb_mut())?;

        let (mut tmp, _) = temp_mat_uninit::<E::Complex>(n, n, stack);
        matmul_with_conj(
            tmp.rb_mut(),
            u,
            Conj::No,
            pow.rb(),
            Conj::No,
            None,
            one,
            parallelism,
        );
        matmul_with_conj(
            pow.rb_mut(),
            tmp.rb(),
            Conj::No,
            u.transpose(),
            Conj::Yes,
            None,
            one,
            parallelism,
        );

        copy_from_complex(out, pow.rb());
        Ok(())
    }

    fn compute_on_req(
        &self,
        rhs_ncols: usize,
        parallelism: Parallelism,
    ) -> Result<StackReq, SizeOverflow> {
        let rhs = temp_mat_req::<E::Complex>(self.nrows(), rhs_ncols)?;
        StackReq::try_all_of([
            rhs,
            rhs,
            self.triangular().compute_on_req(rhs_ncols, parallelism)?,
        ])
    }

    #[track_caller]
    fn compute_on(
        &self,
        out: MatMut<'_, E>,
        rhs: MatRef<'_, E>,
        p: E::Real,
        parallelism: Parallelism,
        stack: PodStack<'_>,
    ) -> Result<(), PowError> {
        let n = self.nrows();
        let m = rhs.ncols();
        assert!(all(rhs.nrows() == n, out.nrows() == n, out.ncols() == m));

        let u = self.schur_vectors.as_ref();
        let one = E::Complex::faer_one();

        let (mut x, stack) = temp_mat_uninit::<E::Complex>(n, m, stack);
        let (mut y, mut stack) = temp_mat_uninit::<E::Complex>(n, m, stack);

        for j in 0..m {
            for i in 0..n {
                y.write(i, j, rhs.read(i, j).to_complex());
            }
        }

        // U T^p U^H B, without forming the power when the triangular evaluator can avoid it
        matmul_with_conj(
            x.rb_mut(),
            u.transpose(),
            Conj::Yes,
            y.rb(),
            Conj::No,
            None,
            one,
            parallelism,
        );
        self.triangular()
            .compute_on(y.rb_mut(), x.rb(), p, parallelism, stack.rb_mut())?;
        matmul_with_conj(
            x.rb_mut(),
            u,
            Conj::No,
            y.rb(),
            Conj::No,
            None,
            one,
            parallelism,
        );

        copy_from_complex(out, x.rb());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TriangularPowerAtomic;
    use assert_approx_eq::assert_approx_eq;
    use equator::assert;
    use faer::{complex_native::c64, mat};

    fn random_shifted(n: usize) -> Mat<f64> {
        Mat::from_fn(n, n, |i, j| {
            let shift = if i == j { 3.0 } else { 0.0 };
            shift + (rand::random::<f64>() - 0.5) / n as f64
        })
    }

    fn random_shifted_c64(n: usize) -> Mat<c64> {
        Mat::from_fn(n, n, |i, j| {
            let shift = if i == j { 3.0 } else { 0.0 };
            c64 {
                re: shift + (rand::random::<f64>() - 0.5) / n as f64,
                im: (rand::random::<f64>() - 0.5) / n as f64,
            }
        })
    }

    fn assert_close(a: MatRef<'_, f64>, b: MatRef<'_, f64>, tol: f64) {
        assert!(all(a.nrows() == b.nrows(), a.ncols() == b.ncols()));
        for j in 0..a.ncols() {
            for i in 0..a.nrows() {
                assert_approx_eq!(a.read(i, j), b.read(i, j), tol);
            }
        }
    }

    #[test]
    fn test_schur_decomposition() {
        let n = 7;
        let a = random_shifted(n);
        let pow = MatrixPower::new(a.as_ref());

        let t = pow.schur_form();
        let u = pow.schur_vectors();
        for j in 0..n {
            for i in j + 1..n {
                assert!(t.read(i, j) == c64::faer_zero());
            }
        }

        let a_c = Mat::<c64>::from_fn(n, n, |i, j| a.read(i, j).to_complex());
        let ut = u * t;
        let recomposed = ut.as_ref() * u.adjoint();
        let identity = u.adjoint() * u;
        for j in 0..n {
            for i in 0..n {
                assert_approx_eq!(recomposed.read(i, j).re, a_c.read(i, j).re, 1e-12);
                assert_approx_eq!(recomposed.read(i, j).im, a_c.read(i, j).im, 1e-12);
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_approx_eq!(identity.read(i, j).re, expected, 1e-12);
                assert_approx_eq!(identity.read(i, j).im, 0.0, 1e-12);
            }
        }
    }

    #[test]
    fn test_real_square_root() {
        for n in [1, 2, 3, 8, 20] {
            let a = random_shifted(n);
            let pow = MatrixPower::new(a.as_ref());
            let sqrt = pow.pow(0.5).eval().unwrap();
            assert_close((&sqrt * &sqrt).as_ref(), a.as_ref(), 1e-10);

            let pow_2 = pow.pow(2.0).eval().unwrap();
            assert_close(pow_2.as_ref(), (&a * &a).as_ref(), 1e-10);
        }
    }

    #[test]
    fn test_rotation() {
        // eigenvalues ±i, the principal square root is the rotation by a quarter of the angle
        let a = mat![[0.0, -1.0], [1.0, 0.0]];
        let pow = MatrixPower::new(a.as_ref());

        let c = core::f64::consts::FRAC_1_SQRT_2;
        let sqrt = pow.pow(0.5).eval().unwrap();
        assert_close(sqrt.as_ref(), mat![[c, -c], [c, c]].as_ref(), 1e-12);

        let square = pow.pow(2.0).eval().unwrap();
        assert_close(square.as_ref(), mat![[-1.0, 0.0], [0.0, -1.0]].as_ref(), 1e-12);
    }

    #[test]
    fn test_triangular_input_matches_triangular_evaluator() {
        let n = 6;
        let t = Mat::<f64>::from_fn(n, n, |i, j| {
            if i == j {
                1.0 + rand::random::<f64>()
            } else if i < j {
                rand::random::<f64>() - 0.5
            } else {
                0.0
            }
        });

        let general = MatrixPower::new(t.as_ref()).pow(0.37).eval().unwrap();
        let triangular = TriangularPowerAtomic::new(t.as_ref())
            .pow(0.37)
            .eval()
            .unwrap();
        assert_close(general.as_ref(), triangular.as_ref(), 1e-10);
    }

    #[test]
    fn test_complex() {
        let n = 9;
        let a = random_shifted_c64(n);
        let pow = MatrixPower::new(a.as_ref());

        let sqrt = pow.pow(0.5).eval().unwrap();
        let square = pow.pow(2.0).eval().unwrap();
        let sqrt_sqrt = &sqrt * &sqrt;
        let a_a = &a * &a;
        for j in 0..n {
            for i in 0..n {
                assert_approx_eq!(sqrt_sqrt.read(i, j).re, a.read(i, j).re, 1e-10);
                assert_approx_eq!(sqrt_sqrt.read(i, j).im, a.read(i, j).im, 1e-10);
                assert_approx_eq!(square.read(i, j).re, a_a.read(i, j).re, 1e-10);
                assert_approx_eq!(square.read(i, j).im, a_a.read(i, j).im, 1e-10);
            }
        }
    }

    #[test]
    fn test_compute_on() {
        let n = 8;
        let a = random_shifted(n);
        let pow = MatrixPower::new(a.as_ref());

        for m in [1, 3] {
            let rhs = Mat::<f64>::from_fn(n, m, |_, _| rand::random::<f64>());
            for p in [1.7, -0.4, 5.0] {
                let target = &pow.pow(p).eval().unwrap() * &rhs;
                let product = (pow.pow(p) * rhs.as_ref()).eval().unwrap();
                assert_close(product.as_ref(), target.as_ref(), 1e-10);
            }
        }
    }

    #[test]
    fn test_empty() {
        let a = Mat::<f64>::zeros(0, 0);
        let pow = MatrixPower::new(a.as_ref());
        assert_eq!(pow.nrows(), 0);
        assert_eq!(pow.pow(0.5).eval().unwrap().nrows(), 0);
    }

    #[test]
    fn test_non_finite_fails() {
        let a = mat![[1.0, 2.0, 0.0], [0.0, f64::NAN, 1.0], [1.0, 0.0, 2.0]];
        let pow = MatrixPower::new(a.as_ref());
        assert!(matches!(
            pow.pow(0.5).eval(),
            Err(PowError::NumericalFailure { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn test_non_square_panics() {
        let a = Mat::<f64>::zeros(3, 2);
        MatrixPower::new(a.as_ref());
    }
}
