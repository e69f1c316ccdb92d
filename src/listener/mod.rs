/// Moves processed input files to an archive directory
pub mod archive;

pub use archive::ArchiveListener;
