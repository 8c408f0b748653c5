//! Reference graph
//!
//! Turns files under test plus their declared and inline references into
//! the ordered list a harness loads.

mod amd;
mod graph;
mod markers;
mod types;

pub use amd::{amd_path, assign_amd_paths};
pub use graph::{is_reference_file, ReferenceGraphResolver, REFERENCE_EXTENSIONS, TEMP_FILE_PREFIX};
pub use markers::{scan as scan_markers, Marker};
pub use types::{FilePosition, ReferencedFile};
