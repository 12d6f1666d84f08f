use super::{Record, RecordStorage, Recorder};

/// Keeps records in memory.
///
/// Written records are kept as they are. Stored records are aggregated on
/// [`Recorder::flush`] and the aggregate is kept together with its step.
/// Mostly used in tests and for inspecting short runs.
#[derive(Default)]
pub struct BufferedRecorder {
    buf: Vec<Record>,
    storage: RecordStorage,
    flushed: Vec<(i64, Record)>,
}

impl BufferedRecorder {
    /// Constructs the recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterates over written records.
    pub fn iter(&self) -> std::slice::Iter<Record> {
        self.buf.iter()
    }

    /// Returns aggregated records produced by [`Recorder::flush`].
    pub fn flushed(&self) -> &[(i64, Record)] {
        &self.flushed
    }

    /// Returns the scalar series under `key` across written records.
    pub fn scalars(&self, key: &str) -> Vec<f32> {
        self.buf
            .iter()
            .filter_map(|r| r.get_scalar(key).ok())
            .collect()
    }
}

impl Recorder for BufferedRecorder {
    fn write(&mut self, record: Record) {
        self.buf.push(record);
    }

    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        let record = self.storage.aggregate();
        if !record.is_empty() {
            self.flushed.push((step, record));
        }
    }
}
