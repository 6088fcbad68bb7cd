//! Writing a processed volume back into the DICOM series it came from.
//!
//! Each original slice is cloned and only its PixelData is replaced. Slices
//! past the end of the volume are handled by [`LeftoverPolicy`]. Output is
//! staged in `<dest>.partial` and renamed onto `<dest>` once every slice has
//! been written, so an interrupted run never leaves a destination that looks
//! complete.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileDicomObject, FileMetaTableBuilder};
use dicom_dictionary_std::{StandardDataDictionary, tags, uids};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::enums::{HeaderMode, LeftoverPolicy};
use crate::error::{Error, Result};
use crate::pixels;
use crate::series::Series;
use crate::slice::{DicomObject, Slice, get_string};
use crate::uid::mint_uid;
use crate::volume::Volume;

pub const DEFAULT_ANNOTATION: &str = "DEFACED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReinjectOptions {
    pub header_mode: HeaderMode,
    pub leftover: LeftoverPolicy,
    /// Appended to SeriesDescription in [`HeaderMode::Mint`].
    pub annotation: String,
}

impl Default for ReinjectOptions {
    fn default() -> Self {
        Self {
            header_mode: HeaderMode::Preserve,
            leftover: LeftoverPolicy::CopyVerbatim,
            annotation: DEFAULT_ANNOTATION.to_string(),
        }
    }
}

/// Which slices receive volume data and which are leftovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReinjectPlan {
    pub slices: usize,
    pub depth: usize,
    /// Slices `0..cutover` get volume data, `cutover..slices` are leftovers.
    pub cutover: usize,
}

impl ReinjectPlan {
    pub fn new(slices: usize, depth: usize) -> Self {
        Self {
            slices,
            depth,
            cutover: slices.min(depth),
        }
    }

    pub fn leftovers(&self) -> usize {
        self.slices - self.cutover
    }

    /// Volume layers with no slice to receive them.
    pub fn unused_layers(&self) -> usize {
        self.depth - self.cutover
    }
}

#[derive(Debug, Clone)]
pub struct ReinjectReport {
    pub destination: PathBuf,
    pub plan: ReinjectPlan,
    pub series_uid: String,
    /// Written files in slice order.
    pub files: Vec<PathBuf>,
    pub replaced: usize,
    pub copied: usize,
    pub dropped: usize,
}

enum SliceAction {
    Replace,
    Copy,
}

struct SliceJob<'a> {
    index: usize,
    slice: &'a Slice,
    target: PathBuf,
    action: SliceAction,
}

#[derive(Debug, Clone, Default)]
pub struct SliceReinjector {
    options: ReinjectOptions,
}

impl SliceReinjector {
    pub fn new(options: ReinjectOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReinjectOptions {
        &self.options
    }

    pub fn plan(series: &Series, volume: &Volume) -> ReinjectPlan {
        ReinjectPlan::new(series.len(), volume.depth())
    }

    /// Write `volume` into a copy of `series` at `destination`.
    ///
    /// # Errors
    ///
    /// [`Error::InconsistentGeometry`] when the volume's in-plane shape does
    /// not match the series. Any failure while writing leaves `destination`
    /// untouched.
    pub fn reinject(&self, series: &Series, volume: &Volume, destination: impl AsRef<Path>) -> Result<ReinjectReport> {
        let destination = destination.as_ref();
        if series.in_plane_shape() != Some(volume.in_plane_shape()) {
            return Err(Error::InconsistentGeometry {
                series_uid: series.uid().to_string(),
                reason: format!(
                    "volume in-plane shape {:?} does not match series {:?}",
                    volume.in_plane_shape(),
                    series.in_plane_shape()
                ),
            });
        }

        let plan = Self::plan(series, volume);
        if plan.leftovers() > 0 {
            warn!(
                series = series.uid(),
                slices = plan.slices,
                depth = plan.depth,
                policy = ?self.options.leftover,
                "volume is shorter than the series"
            );
        }
        if plan.unused_layers() > 0 {
            warn!(
                series = series.uid(),
                unused = plan.unused_layers(),
                "volume is deeper than the series, extra layers ignored"
            );
        }

        let series_uid = match self.options.header_mode {
            HeaderMode::Preserve => series.uid().to_string(),
            HeaderMode::Mint => mint_uid(),
        };

        let staging = staging_dir(destination)?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let jobs = self.jobs(series, &plan, &staging);
        let dropped = plan.slices - jobs.len();

        let written = jobs
            .par_iter()
            .map(|job| self.write_slice(job, volume, &series_uid))
            .collect::<Result<Vec<()>>>();
        if let Err(error) = written {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!(staging = %staging.display(), %cleanup, "failed to remove staging directory");
            }
            return Err(error);
        }

        publish(&staging, destination)?;

        let files = jobs
            .iter()
            .filter_map(|job| job.target.file_name())
            .map(|name| destination.join(name))
            .collect();
        let replaced = jobs
            .iter()
            .filter(|job| matches!(job.action, SliceAction::Replace))
            .count();

        let report = ReinjectReport {
            destination: destination.to_path_buf(),
            plan,
            series_uid,
            files,
            replaced,
            copied: jobs.len() - replaced,
            dropped,
        };
        info!(
            destination = %destination.display(),
            replaced = report.replaced,
            copied = report.copied,
            dropped = report.dropped,
            mode = ?self.options.header_mode,
            "reinjected series"
        );
        Ok(report)
    }

    fn jobs<'a>(&self, series: &'a Series, plan: &ReinjectPlan, staging: &Path) -> Vec<SliceJob<'a>> {
        let mut used = HashSet::new();
        series
            .slices()
            .iter()
            .enumerate()
            .filter_map(|(index, slice)| {
                let action = if index < plan.cutover {
                    SliceAction::Replace
                } else {
                    match self.options.leftover {
                        LeftoverPolicy::CopyVerbatim => SliceAction::Copy,
                        LeftoverPolicy::Drop => return None,
                    }
                };
                let name = output_name(slice, index, &mut used);
                Some(SliceJob {
                    index,
                    slice,
                    target: staging.join(name),
                    action,
                })
            })
            .collect()
    }

    fn write_slice(&self, job: &SliceJob<'_>, volume: &Volume, series_uid: &str) -> Result<()> {
        let slice = job.slice;
        match (&job.action, self.options.header_mode) {
            (SliceAction::Copy, HeaderMode::Preserve) => {
                fs::copy(&slice.path, &job.target)?;
            }
            (SliceAction::Copy, HeaderMode::Mint) => {
                let object = slice.open()?;
                let object = self.mint_identifiers(object, series_uid, false)?;
                object.write_to_file(&job.target)?;
            }
            (SliceAction::Replace, mode) => {
                let image = volume.slice(job.index).ok_or_else(|| Error::InconsistentGeometry {
                    series_uid: slice.series_uid.clone(),
                    reason: format!("volume has no layer {}", job.index),
                })?;
                let bytes = pixels::encode(image, slice.rescale, slice.format, &slice.path)?;

                let object = slice.open()?;
                let mut object = match mode {
                    HeaderMode::Preserve if is_native(&object) => object,
                    HeaderMode::Preserve => {
                        let sop_instance_uid = object
                            .meta()
                            .media_storage_sop_instance_uid()
                            .trim_end_matches(['\0', ' '])
                            .to_string();
                        rebuild_meta(object, &sop_instance_uid, true)?
                    }
                    HeaderMode::Mint => self.mint_identifiers(object, series_uid, true)?,
                };
                pixels::put_pixel_data(&mut object, bytes, slice.format);
                object.write_to_file(&job.target)?;
            }
        }
        debug!(source = %slice.path.display(), target = %job.target.display(), "wrote slice");
        Ok(())
    }

    /// New series and instance identifiers plus the annotated description.
    fn mint_identifiers(&self, object: DicomObject, series_uid: &str, native: bool) -> Result<DicomObject> {
        let sop_instance_uid = mint_uid();
        let mut object = rebuild_meta(object, &sop_instance_uid, native)?;

        let description = match get_string(&object, tags::SERIES_DESCRIPTION).filter(|d| !d.is_empty()) {
            Some(description) => format!("{description} {}", self.options.annotation),
            None => self.options.annotation.clone(),
        };
        let mut put = |tag: Tag, vr: VR, value: String| {
            object.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        };
        put(tags::SERIES_INSTANCE_UID, VR::UI, series_uid.to_string());
        put(tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid);
        put(tags::SERIES_DESCRIPTION, VR::LO, description);
        Ok(object)
    }
}

/// Whether the object is stored in an uncompressed little-endian syntax.
fn is_native(object: &DicomObject) -> bool {
    let ts = object.meta().transfer_syntax().trim_end_matches(['\0', ' ']);
    ts == uids::EXPLICIT_VR_LITTLE_ENDIAN || ts == uids::IMPLICIT_VR_LITTLE_ENDIAN
}

/// Rebuild the file meta with `sop_instance_uid`. With `native` set, an
/// encapsulated object is switched to Explicit VR Little Endian; the caller
/// must then replace its PixelData.
fn rebuild_meta(object: DicomObject, sop_instance_uid: &str, native: bool) -> Result<DicomObject> {
    let transfer_syntax = if native && !is_native(&object) {
        uids::EXPLICIT_VR_LITTLE_ENDIAN.to_string()
    } else {
        object.meta().transfer_syntax().trim_end_matches(['\0', ' ']).to_string()
    };
    let sop_class_uid = object
        .meta()
        .media_storage_sop_class_uid()
        .trim_end_matches(['\0', ' '])
        .to_string();

    let meta = FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(sop_class_uid.as_str())
        .media_storage_sop_instance_uid(sop_instance_uid)
        .transfer_syntax(transfer_syntax.as_str())
        .build()?;
    let mut rebuilt = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for element in object.into_inner() {
        rebuilt.put(element);
    }
    Ok(rebuilt)
}

fn output_name(slice: &Slice, index: usize, used: &mut HashSet<OsString>) -> OsString {
    if let Some(name) = slice.file_name() {
        if used.insert(name.to_os_string()) {
            return name.to_os_string();
        }
    }
    let mut name = OsString::from(format!("IM_{:04}.dcm", index + 1));
    let mut suffix = 1;
    while !used.insert(name.clone()) {
        name = OsString::from(format!("IM_{:04}_{suffix}.dcm", index + 1));
        suffix += 1;
    }
    name
}

/// `<dest>.partial`, next to the destination.
pub fn staging_dir(destination: &Path) -> Result<PathBuf> {
    let name = destination.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("destination {} has no directory name", destination.display()),
        )
    })?;
    let mut staged = name.to_os_string();
    staged.push(".partial");
    Ok(destination.with_file_name(staged))
}

fn publish(staging: &Path, destination: &Path) -> Result<()> {
    if destination.is_dir() {
        fs::remove_dir_all(destination)?;
    } else if destination.exists() {
        fs::remove_file(destination)?;
    }
    fs::rename(staging, destination)?;
    Ok(())
}
