use std::path::PathBuf;

/// Configuration options supplied when opening a [`super::Store`].
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Repository directory holding the channel files.
    pub path: PathBuf,
    /// Maximum number of connector-slot segments per direction.
    pub max_segments: u32,
    /// Connector slots per segment.
    pub slots_per_segment: u32,
    /// Connector handles per slot.
    pub connectors_per_slot: u32,
    /// Element cells per arena segment.
    pub cell_segment_size: usize,
    /// Truncate all channel files instead of replaying them.
    pub clear_on_open: bool,
}

impl StoreOptions {
    /// Creates options for the repository at `path` with default limits.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_segments: 512,
            slots_per_segment: 65_536,
            connectors_per_slot: 256,
            cell_segment_size: 4096,
            clear_on_open: false,
        }
    }

    /// Sets the maximum number of connector-slot segments.
    pub fn max_segments(mut self, n: u32) -> Self {
        self.max_segments = n;
        self
    }

    /// Sets the number of connector slots per segment.
    pub fn slots_per_segment(mut self, n: u32) -> Self {
        self.slots_per_segment = n;
        self
    }

    /// Sets the number of connector handles per slot.
    pub fn connectors_per_slot(mut self, n: u32) -> Self {
        self.connectors_per_slot = n;
        self
    }

    /// Sets the element-cell arena segment size.
    pub fn cell_segment_size(mut self, n: usize) -> Self {
        self.cell_segment_size = n;
        self
    }

    /// Opens the repository empty, discarding any existing data.
    pub fn clear_on_open(mut self, clear: bool) -> Self {
        self.clear_on_open = clear;
        self
    }
}
