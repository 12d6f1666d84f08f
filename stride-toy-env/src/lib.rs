//! Environments small enough to train on in a unit test.
//!
//! * [`PointReach`] has continuous actions: move a point towards a target.
//! * [`Corridor`] has discrete actions: walk to the right end of a corridor.
//!
//! Both observe `Vec<f32>`, so they work with the linear models of
//! `stride-policy-no-backend`.
mod corridor;
mod point_reach;
pub use corridor::{Corridor, CorridorConfig};
pub use point_reach::{PointReach, PointReachConfig};

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let rdr = BufReader::new(File::open(path)?);
    Ok(serde_yaml::from_reader(rdr)?)
}

fn save_yaml<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(serde_yaml::to_string(value)?.as_bytes())?;
    Ok(())
}
