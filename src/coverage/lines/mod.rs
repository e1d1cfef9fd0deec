//! Line and branch execution data

mod line_data;
mod per_file;
mod segment;

pub use line_data::*;
pub use per_file::*;
pub use segment::*;
