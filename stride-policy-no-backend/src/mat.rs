//! Row-major dense matrix.
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// A row-major `rows x cols` matrix of `f32`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Mat {
    /// Elements, row by row.
    pub data: Vec<f32>,

    /// `[rows, cols]`.
    pub shape: [usize; 2],
}

impl Mat {
    /// Matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            shape: [rows, cols],
        }
    }

    /// Matrix from row-major elements.
    pub fn new(data: Vec<f32>, rows: usize, cols: usize) -> Result<Self> {
        ensure!(
            data.len() == rows * cols,
            "{} elements for a {}x{} matrix",
            data.len(),
            rows,
            cols
        );
        Ok(Self {
            data,
            shape: [rows, cols],
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.shape[1]
    }

    /// `self * x` for a column vector `x`.
    pub fn matvec(&self, x: &[f32]) -> Vec<f32> {
        let l = self.cols();
        self.data
            .chunks(l.max(1))
            .take(self.rows())
            .map(|row| row.iter().zip(x.iter()).map(|(w, x)| w * x).sum())
            .collect()
    }

    /// `self += alpha * u v^T`.
    pub fn add_outer(&mut self, alpha: f32, u: &[f32], v: &[f32]) {
        let n = self.cols();
        for (i, ui) in u.iter().enumerate().take(self.rows()) {
            for (j, vj) in v.iter().enumerate().take(n) {
                self.data[i * n + j] += alpha * ui * vj;
            }
        }
    }
}

impl From<Vec<f32>> for Mat {
    /// Column vector.
    fn from(x: Vec<f32>) -> Self {
        let shape = [x.len(), 1];
        Self { shape, data: x }
    }
}
