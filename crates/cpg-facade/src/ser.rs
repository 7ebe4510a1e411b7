//! Canonical serialization of a [`ProgramGraph`], so that whatever exports
//! the graph and the query engine agree on the format.

use anyhow::{Context, Result};
use cfg_if::cfg_if;
use std::{fs::File, io::BufReader, path::Path};

use crate::ProgramGraph;

cfg_if! {
    if #[cfg(feature = "binenc")] {
        const CODEC: &str = "bincode";
    } else {
        const CODEC: &str = "json";
    }
}

impl ProgramGraph {
    /// Write `self` using the configured serialization format
    pub fn canonical_write(&self, path: &Path) -> Result<()> {
        let mut out_file = File::create(path)?;
        cfg_if! {
            if #[cfg(feature = "binenc")] {
                let write = bincode::serialize_into(&mut out_file, self);
            } else {
                let write = serde_json::to_writer(&mut out_file, self);
            }
        }
        write.with_context(|| {
            format!(
                "Writing graph with codec {CODEC} to {}",
                path.canonicalize()
                    .unwrap_or_else(|_| path.to_owned())
                    .display()
            )
        })?;
        log::debug!(
            "Wrote graph with {} nodes to {}",
            self.node_count(),
            path.display()
        );
        Ok(())
    }

    /// Read a graph using the configured serialization format
    pub fn canonical_read(path: &Path) -> Result<Self> {
        let in_file = File::open(path)
            .with_context(|| format!("Opening graph file {}", path.display()))?;
        let reader = BufReader::new(in_file);
        cfg_if! {
            if #[cfg(feature = "binenc")] {
                let read: Result<Self, _> = bincode::deserialize_from(reader);
            } else {
                let read: Result<Self, _> = serde_json::from_reader(reader);
            }
        };
        read.with_context(|| {
            format!(
                "Reading graph with codec {CODEC} from {}",
                path.canonicalize()
                    .unwrap_or_else(|_| path.to_owned())
                    .display()
            )
        })
    }
}
