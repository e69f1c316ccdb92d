//! Reading a set of files as one source.
//!
//! The files are discovered when the reader is opened: `pattern` is matched
//! against the entries of an explicit root directory and the matches are
//! sorted by path, so the concatenated record sequence does not depend on
//! directory listing order. Only one file is open at any time.

use std::{
    cell::{Cell, RefCell},
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    error::BatchError,
};

/// A reader whose input file can be swapped between runs of `open`.
pub trait ResourceAwareItemReader<T>: ItemReader<T> {
    fn set_resource(&self, resource: &Path);
}

/// Exposes every file matching a pattern as one [`ItemReader`].
///
/// Files are handed one after the other to a delegate reader: the next file is
/// opened only when the previous one is exhausted and closed.
pub struct MultiResourceItemReader<D> {
    root: PathBuf,
    pattern: String,
    delegate: D,
    resources: RefCell<Vec<PathBuf>>,
    /// Index of the resource the delegate is reading, if one is open
    current: Cell<Option<usize>>,
    next: Cell<usize>,
}

impl<D> MultiResourceItemReader<D> {
    pub fn new<P: AsRef<Path>>(root: P, pattern: &str, delegate: D) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            pattern: pattern.to_string(),
            delegate,
            resources: RefCell::new(Vec::new()),
            current: Cell::new(None),
            next: Cell::new(0),
        }
    }

    /// Files resolved by the last `open`, in reading order.
    pub fn resources(&self) -> Vec<PathBuf> {
        self.resources.borrow().clone()
    }

    /// Root directory escaped, joined with the file name pattern.
    fn full_pattern(&self) -> String {
        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        Path::new(&root)
            .join(&self.pattern)
            .to_string_lossy()
            .into_owned()
    }

    fn resolve(&self) -> Result<Vec<PathBuf>, BatchError> {
        let pattern = self.full_pattern();
        let paths = glob::glob(&pattern)
            .map_err(|error| BatchError::Configuration(format!("{}: {}", pattern, error)))?;

        let mut resources = Vec::new();
        for entry in paths {
            let path = entry.map_err(|error| BatchError::SourceUnavailable(error.to_string()))?;
            if path.is_file() {
                resources.push(path);
            }
        }
        resources.sort();

        if resources.is_empty() {
            return Err(BatchError::NoResourcesMatched(pattern));
        }
        Ok(resources)
    }

    fn close_current<T>(&self) -> Result<(), BatchError>
    where
        D: ResourceAwareItemReader<T>,
    {
        match self.current.take() {
            Some(_) => self.delegate.close(),
            None => Ok(()),
        }
    }

    /// Opens the next resource, returning `false` when none is left.
    fn open_next<T>(&self) -> Result<bool, BatchError>
    where
        D: ResourceAwareItemReader<T>,
    {
        let index = self.next.get();
        let Some(resource) = self.resources.borrow().get(index).cloned() else {
            return Ok(false);
        };

        self.next.set(index + 1);
        debug!("Reading resource {}", resource.display());
        self.delegate.set_resource(&resource);
        self.delegate.open()?;
        self.current.set(Some(index));
        Ok(true)
    }
}

impl<T, D: ResourceAwareItemReader<T>> ItemReader<T> for MultiResourceItemReader<D> {
    /// Resolves the resources and rewinds to the first one.
    fn open(&self) -> Result<(), BatchError> {
        self.close_current::<T>()?;

        let resources = self.resolve()?;
        info!(
            "{} resources matched {}",
            resources.len(),
            self.full_pattern()
        );

        *self.resources.borrow_mut() = resources;
        self.next.set(0);
        Ok(())
    }

    fn read(&self) -> ItemReaderResult<T> {
        loop {
            if self.current.get().is_none() && !self.open_next::<T>()? {
                return Ok(None);
            }

            match self.delegate.read()? {
                Some(item) => return Ok(Some(item)),
                None => self.close_current::<T>()?,
            }
        }
    }

    fn close(&self) -> Result<(), BatchError> {
        self.close_current::<T>()
    }
}
