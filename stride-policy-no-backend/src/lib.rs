#![warn(missing_docs)]
//! Policies and value functions linear in the observation.
//!
//! The models implement [`PolicyModel`](stride_core::PolicyModel) and
//! [`ValueModel`](stride_core::ValueModel) with closed-form gradients and
//! plain SGD, so the pipeline of `stride-core` can be trained without a deep
//! learning backend. Observations are any `AsRef<[f32]>`. Parameters are
//! saved with `bincode`, configurations with `serde_yaml`.
mod gaussian;
mod mat;
mod softmax;
mod value;
pub use gaussian::{LinearGaussianPolicy, LinearGaussianPolicyConfig};
pub use mat::Mat;
pub use softmax::{LinearSoftmaxPolicy, LinearSoftmaxPolicyConfig};
pub use value::{LinearValue, LinearValueConfig};

use anyhow::Result;
use log::{debug, trace};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Rescales `grad` so that its L2 norm is at most `max_norm`.
fn clip_grad_norm(grad: &mut [f32], max_norm: Option<f32>) {
    if let Some(max_norm) = max_norm {
        let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
        if norm > max_norm {
            trace!("Clipped gradient norm {} to {}", norm, max_norm);
            let scale = max_norm / norm;
            grad.iter_mut().for_each(|g| *g *= scale);
        }
    }
}

fn save_bincode<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let mut wtr = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut wtr, value)?;
    wtr.flush()?;
    Ok(())
}

fn load_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading parameters from {:?}", path);
    let rdr = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(rdr)?)
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let rdr = BufReader::new(File::open(path)?);
    Ok(serde_yaml::from_reader(rdr)?)
}

fn save_yaml<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(serde_yaml::to_string(value)?.as_bytes())?;
    Ok(())
}
