/// This module provides a reader over every file matching a pattern.
pub mod multi_resource;

/// This module provides a delimited file reader and writer.
#[cfg(feature = "csv")]
#[cfg_attr(docsrs, doc(cfg(feature = "csv")))]
pub mod csv;

/// This module provides SQLite readers and writers.
#[cfg(feature = "rdbc-sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "rdbc-sqlite")))]
pub mod rdbc;
