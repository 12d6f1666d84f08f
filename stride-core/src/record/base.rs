//! Key-value records emitted by the training loop.
use crate::error::StrideError;
use chrono::prelude::{DateTime, Local};
use std::collections::{
    hash_map::{IntoIter, Iter, Keys},
    HashMap,
};

/// A value stored in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A scalar, e.g. a loss, a clip fraction or an evaluation score.
    Scalar(f32),

    /// A timestamp.
    DateTime(DateTime<Local>),

    /// A 1-dimensional array, e.g. per-environment returns.
    Array1(Vec<f32>),

    /// A text value.
    String(String),
}

/// A set of named values produced by one step of the pipeline.
///
/// ```rust
/// use stride_core::record::{Record, RecordValue};
///
/// let mut record = Record::from_scalar("loss_policy", 0.25);
/// record.insert("global_step", RecordValue::Scalar(512.0));
/// assert_eq!(record.get_scalar("loss_policy").unwrap(), 0.25);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Creates a record holding a single scalar.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Creates a record from `(key, value)` pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Returns the keys of the record.
    pub fn keys(&self) -> Keys<String, RecordValue> {
        self.0.keys()
    }

    /// Inserts a value, replacing any previous value under the same key.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Iterates over `(key, value)` pairs.
    pub fn iter(&self) -> Iter<'_, String, RecordValue> {
        self.0.iter()
    }

    /// Consumes the record into an iterator of `(key, value)` pairs.
    pub fn into_iter_in_record(self) -> IntoIter<String, RecordValue> {
        self.0.into_iter()
    }

    /// Returns the value under `k`.
    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Merges two records. Values of `record` win on key collisions.
    pub fn merge(self, record: Record) -> Self {
        Record(self.0.into_iter().chain(record.0).collect())
    }

    /// Merges `record` into `self`. Values of `record` win on key collisions.
    pub fn merge_inplace(&mut self, record: Record) {
        self.0.extend(record.0);
    }

    /// Returns the scalar under `k`.
    pub fn get_scalar(&self, k: &str) -> Result<f32, StrideError> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Ok(*v),
            Some(_) => Err(StrideError::RecordValueTypeError("Scalar".to_string())),
            None => Err(StrideError::RecordKeyError(k.to_string())),
        }
    }

    /// Returns the 1-dimensional array under `k`.
    pub fn get_array1(&self, k: &str) -> Result<Vec<f32>, StrideError> {
        match self.0.get(k) {
            Some(RecordValue::Array1(v)) => Ok(v.clone()),
            Some(_) => Err(StrideError::RecordValueTypeError("Array1".to_string())),
            None => Err(StrideError::RecordKeyError(k.to_string())),
        }
    }

    /// Returns the string under `k`.
    pub fn get_string(&self, k: &str) -> Result<String, StrideError> {
        match self.0.get(k) {
            Some(RecordValue::String(s)) => Ok(s.clone()),
            Some(_) => Err(StrideError::RecordValueTypeError("String".to_string())),
            None => Err(StrideError::RecordKeyError(k.to_string())),
        }
    }

    /// Returns `true` if the record has no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}
