use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::enums::SortBy;
use crate::error::{Error, Result};
use crate::series::Series;
use crate::slice::Slice;

/// All series found under one input root, keyed by SeriesInstanceUID.
#[derive(Debug, Clone)]
pub struct SeriesSet {
    root: PathBuf,
    series: BTreeMap<String, Series>,
    skipped: Vec<PathBuf>,
}

impl SeriesSet {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Series> {
        self.series.values()
    }

    /// Explicit choice of one series by SeriesInstanceUID.
    pub fn select(&self, uid: &str) -> Option<&Series> {
        self.series.get(uid)
    }

    /// Files under the root that could not be used as slices.
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    /// The default target when the root holds exactly one series.
    pub fn single(&self) -> Option<&Series> {
        match self.series.len() {
            1 => self.series.values().next(),
            _ => None,
        }
    }

    /// The single series, or the one with the most slices when there are
    /// several (ties resolved by UID order).
    pub fn primary(&self) -> Option<&Series> {
        if let Some(series) = self.single() {
            return Some(series);
        }
        let chosen = self
            .series
            .values()
            .rev()
            .max_by_key(|series| series.len())?;
        warn!(
            series = self.series.len(),
            chosen = chosen.uid(),
            slices = chosen.len(),
            "multiple series found, using the largest"
        );
        Some(chosen)
    }
}

pub struct SeriesGrouper;

impl SeriesGrouper {
    /// Scan `root` recursively and group every readable DICOM image by series.
    ///
    /// Parsing happens for all files first; only successfully parsed headers
    /// reach the grouping stage, so unreadable files never affect ordering.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSeriesFound`] when no file under `root` is a usable
    /// DICOM image.
    pub fn scan(root: impl AsRef<Path>, sort_by: SortBy) -> Result<SeriesSet> {
        let root = root.as_ref();
        let mut paths = Vec::new();
        Self::collect_files(root, &mut paths)?;
        Self::scan_paths(root, paths, sort_by)
    }

    /// Like [`SeriesGrouper::scan`], but only the files directly inside
    /// `root`; subdirectories are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSeriesFound`] when `root` itself holds no usable
    /// DICOM image.
    pub fn scan_dir(root: impl AsRef<Path>, sort_by: SortBy) -> Result<SeriesSet> {
        let root = root.as_ref();
        let paths = direct_files(root)?;
        Self::scan_paths(root, paths, sort_by)
    }

    fn scan_paths(root: &Path, mut paths: Vec<PathBuf>, sort_by: SortBy) -> Result<SeriesSet> {
        paths.sort();
        debug!(root = %root.display(), files = paths.len(), "scanning for DICOM files");

        let parsed: Vec<(PathBuf, Result<Slice>)> = paths
            .into_par_iter()
            .map(|path| {
                let slice = Slice::read(&path);
                (path, slice)
            })
            .collect();

        let mut slices = Vec::with_capacity(parsed.len());
        let mut skipped = Vec::new();
        for (path, result) in parsed {
            match result {
                Ok(slice) => slices.push(slice),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping file");
                    skipped.push(path);
                }
            }
        }

        let series = Self::group(slices, sort_by);
        if series.is_empty() {
            return Err(Error::NoSeriesFound {
                root: root.to_path_buf(),
            });
        }
        info!(
            root = %root.display(),
            series = series.len(),
            skipped = skipped.len(),
            "grouped DICOM series"
        );

        Ok(SeriesSet {
            root: root.to_path_buf(),
            series,
            skipped,
        })
    }

    /// Group parsed slices by SeriesInstanceUID and order each group.
    pub fn group(slices: Vec<Slice>, sort_by: SortBy) -> BTreeMap<String, Series> {
        let mut groups: BTreeMap<String, Vec<Slice>> = BTreeMap::new();
        for slice in slices {
            groups.entry(slice.series_uid.clone()).or_default().push(slice);
        }
        groups
            .into_iter()
            .map(|(uid, slices)| (uid.clone(), Series::new(uid, slices, sort_by)))
            .collect()
    }

    fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect_files(&path, out)?;
            } else if path.is_file() {
                out.push(path);
            }
        }
        Ok(())
    }
}

fn direct_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Whether `dir` directly contains at least one readable DICOM image.
pub fn has_dicom_files(dir: &Path) -> bool {
    let Ok(files) = direct_files(dir) else {
        return false;
    };
    files.iter().any(|path| Slice::read(path).is_ok())
}
