use faer::diag::DiagRef;
use faer::linalg::solvers::{self, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("Matrix is numerically singular (pivot ratio {0:.3e}).")]
    NumericallySingular(f64),
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl FaerStorage<'_> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy faer view of an ndarray matrix when its memory layout allows it.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => {
                FaerStorage::Borrowed(MatRef::from_row_major_slice(slice, rows, cols))
            }
            Some(slice) if array.t().is_standard_layout() => {
                FaerStorage::Borrowed(MatRef::from_column_major_slice(slice, rows, cols))
            }
            _ => FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)])),
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

/// Column-vector counterpart of [`FaerArrayView`].
pub struct FaerColView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerColView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix1>) -> Self {
        let len = array.len();
        let storage = match array.as_slice() {
            Some(slice) => FaerStorage::Borrowed(MatRef::from_row_major_slice(slice, len, 1)),
            None => FaerStorage::Owned(Mat::from_fn(len, 1, |i, _| array[i])),
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

pub trait FaerEigh {
    /// Eigenpairs of a symmetric matrix, in the order faer returns them.
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;

    /// Eigenpairs sorted by descending eigenvalue; eigenvectors are the columns.
    fn eigh_descending(&self) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let (values, vectors) = self.eigh(Side::Lower)?;
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&i, &j| values[j].total_cmp(&values[i]));
        let sorted_values = Array1::from_iter(order.iter().map(|&i| values[i]));
        let mut sorted_vectors = Array2::zeros(vectors.raw_dim());
        for (dst, &src) in order.iter().enumerate() {
            sorted_vectors.column_mut(dst).assign(&vectors.column(src));
        }
        Ok((sorted_values, sorted_vectors))
    }
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let eigen = faer_view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());
        Ok((values, vectors))
    }
}

pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let rhs_view = FaerColView::new(rhs);
        let sol = self.factor.solve(rhs_view.as_ref());
        Array1::from_shape_fn(rhs.len(), |i| sol[(i, 0)])
    }

    /// Diagonal of the lower factor `L`.
    pub fn diag(&self) -> Array1<f64> {
        diag_to_array(self.factor.L().diagonal())
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;

    /// Cholesky factorization that also rejects numerically rank-deficient matrices:
    /// the squared pivot ratio must stay above `tolerance`.
    fn cholesky_checked(&self, tolerance: f64) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let factor = self.cholesky(Side::Lower)?;
        let diag = factor.diag();
        let max = diag.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
        let min = diag.iter().fold(f64::INFINITY, |acc, &v| acc.min(v.abs()));
        if max > 0.0 {
            let ratio = (min / max).powi(2);
            if ratio < tolerance {
                return Err(FaerLinalgError::NumericallySingular(ratio));
            }
        }
        Ok(factor)
    }
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn descending_eigenpairs_reconstruct_the_matrix() {
        let matrix = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 1.0]];
        let (values, vectors) = matrix.eigh_descending().unwrap();
        assert!(values[0] >= values[1] && values[1] >= values[2]);

        let rebuilt = vectors.dot(&Array2::from_diag(&values)).dot(&vectors.t());
        for (a, b) in rebuilt.iter().zip(matrix.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn cholesky_solves_spd_system() {
        let matrix = array![[4.0, 2.0], [2.0, 3.0]];
        let rhs = array![2.0, 1.0];
        let factor = matrix.cholesky_checked(1e-12).unwrap();
        let x = factor.solve_vec(&rhs);
        let back = matrix.dot(&x);
        assert_abs_diff_eq!(back[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(back[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn cholesky_rejects_rank_deficient_matrix() {
        let matrix = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(matrix.cholesky_checked(1e-10).is_err());
    }

    #[test]
    fn transposed_views_are_read_correctly() {
        let matrix = array![[1.0, 2.0], [3.0, 4.0]];
        let transposed = matrix.t();
        let view = FaerArrayView::new(&transposed);
        assert_eq!(view.as_ref()[(0, 1)], 3.0);
        assert_eq!(view.as_ref()[(1, 0)], 2.0);
    }
}
