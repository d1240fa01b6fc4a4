pub const ASSET_COUNT: usize = 3;

/// Lower-triangular Cholesky factor over stocks, bonds and crypto, in that order.
pub type Factor = [[f64; ASSET_COUNT]; ASSET_COUNT];

const PIVOT_EPS: f64 = 1e-12;

/// Cholesky factorisation tolerant of positive semi-definite input: pivots at
/// or below `PIVOT_EPS` collapse to zero instead of producing NaN.
pub fn cholesky<const N: usize>(matrix: &[[f64; N]; N]) -> [[f64; N]; N] {
    let mut l = [[0.0; N]; N];

    for i in 0..N {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();

            if i == j {
                let pivot = matrix[i][i] - sum;
                l[i][j] = if pivot > PIVOT_EPS { pivot.sqrt() } else { 0.0 };
            } else if l[j][j] > 0.0 {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }

    l
}

/// Unit diagonal, `rho` everywhere else.
pub fn equicorrelation_matrix(rho: f64) -> Factor {
    let mut m = [[rho; ASSET_COUNT]; ASSET_COUNT];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

pub fn equicorrelation_factor(rho: f64) -> Factor {
    cholesky(&equicorrelation_matrix(rho))
}

/// `L · z` for a lower-triangular `L`.
pub fn correlate<const N: usize>(factor: &[[f64; N]; N], z: &[f64; N]) -> [f64; N] {
    let mut out = [0.0; N];
    for (i, row) in factor.iter().enumerate() {
        out[i] = row[..=i].iter().zip(&z[..=i]).map(|(l, z)| l * z).sum();
    }
    out
}
