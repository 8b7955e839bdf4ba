//! Trace Snapshots
//!
//! Per-iteration JSON traces of runtime state, for offline inspection of a
//! run. Components implement [`HaloSnapshot`]; the writer accumulates one
//! value per iteration and saves a single JSON document at the end.
//!

use crate::buffered_msgs::*;
use crate::chrono::Local;
use crate::irr_matrix::*;
use crate::runtime::*;
use crate::serde_json;
use crate::simulation::*;
use crate::transport::*;
use crate::vertex_cache::*;
use std::fs::File;
use std::io::Write;

pub trait HaloSnapshot {
    /// take a snapshot; set `abbrev` to true to save space
    fn snapshot(&self, abbrev: bool) -> serde_json::Value;
}

impl HaloSnapshot for VertexCache {
    fn snapshot(&self, abbrev: bool) -> serde_json::Value {
        let mut value = json!({
            "n_cached": self.n_cached(),
            "pool_available": self.pool_available(),
            "nhits": self.perf.nhits,
            "nmisses": self.perf.nmisses,
        });
        if !abbrev {
            value["capacity"] = json!(self.capacity());
            value["local_neighbors"] = json!(self.local_neighbors_iter().count());
        }
        value
    }
}

impl HaloSnapshot for IrrMatrix {
    fn snapshot(&self, abbrev: bool) -> serde_json::Value {
        let usage = self.usage();
        let mut value = json!({
            "words_used": usage.words_used,
            "max_row_len": usage.max_row_len,
        });
        if !abbrev {
            value["words_capacity"] = json!(usage.words_capacity);
            value["max_row_index"] = json!(usage.max_row_index);
        }
        value
    }
}

impl HaloSnapshot for BufferedMsgs {
    fn snapshot(&self, _abbrev: bool) -> serde_json::Value {
        json!({ "mem_used": self.mem_used() })
    }
}

impl<T: Transport, S: VertexSimulation> HaloSnapshot for HaloRuntime<T, S> {
    fn snapshot(&self, abbrev: bool) -> serde_json::Value {
        let mut value = json!({
            "pe": self.my_pe(),
            "iter": self.iter_count(),
            "cache": self.cache().snapshot(abbrev),
            "matrix": self.matrix().snapshot(abbrev),
        });
        if !abbrev {
            value["stats"] = serde_json::to_value(&self.stats).unwrap();
        }
        value
    }
}

pub struct SnapshotWriter {
    path: String,
    snapshots: Vec<serde_json::Value>,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            snapshots: Vec::new(),
        }
    }

    pub fn record(&mut self, snapshot: serde_json::Value) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn save(&self) -> std::io::Result<()> {
        let document = json!({
            "format": "halosim-trace",
            "version": env!("CARGO_PKG_VERSION"),
            "created": Local::now().to_rfc3339(),
            "snapshots": self.snapshots,
        });
        let mut file = File::create(&self.path)?;
        file.write_all(serde_json::to_string_pretty(&document)?.as_bytes())
    }
}
