//! Case-level orchestration: the simple converters and the batch defacing run.
//!
//! A batch run discovers cases under an input root, gives each one a
//! [`ConversionJob`] with its own working directory and pushes it through
//! grouping, assembly, the model, candidate selection, series matching and
//! reinjection. Cases never share paths, so they run concurrently up to the
//! configured worker count and a failing case never stops its siblings.

use std::fs;
use std::path::{Component, Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::candidate::{CandidateSelector, Selection};
use crate::config::PipelineConfig;
use crate::enums::SortBy;
use crate::error::{CaseError, Error, Result, Stage, StageContext};
use crate::matcher::SeriesMatcher;
use crate::model::{DefacingModel, ModelRequest};
use crate::nifti_io;
use crate::reinjector::{ReinjectOptions, ReinjectReport, SliceReinjector};
use crate::series::Series;
use crate::series_grouper::{SeriesGrouper, SeriesSet, has_dicom_files};
use crate::sidecar::MetadataSidecar;
use crate::volume_loader::{AssembledVolume, VolumeLoader};

/// Forward conversion of one series under `input` into `out_dir`.
///
/// Without `series_uid` the single series is used, or the largest one when
/// `input` holds several.
pub fn dicom_to_nifti(input: &Path, out_dir: &Path, series_uid: Option<&str>) -> Result<AssembledVolume> {
    let set = SeriesGrouper::scan(input, SortBy::default())?;
    let series = match series_uid {
        Some(uid) => set.select(uid).ok_or_else(|| Error::UnknownSeries {
            uid: uid.to_string(),
            root: input.to_path_buf(),
        })?,
        None => set.primary().ok_or_else(|| Error::NoSeriesFound {
            root: input.to_path_buf(),
        })?,
    };
    VolumeLoader::assemble_to(series, out_dir, series.uid())
}

/// Rebuild a DICOM series from a bare volume and its sidecar.
///
/// The sidecar defaults to the one next to the volume; when none exists the
/// series is synthesized from the volume geometry and CT defaults.
pub fn nifti_to_dicom(nifti: &Path, out_dir: &Path, sidecar: Option<&Path>) -> Result<Vec<PathBuf>> {
    let volume = nifti_io::read_volume(nifti)?;
    let sidecar_path = sidecar.map_or_else(|| MetadataSidecar::path_for(nifti), Path::to_path_buf);

    let sidecar = if sidecar_path.is_file() {
        MetadataSidecar::read(&sidecar_path)?
    } else {
        warn!(
            sidecar = %sidecar_path.display(),
            "no sidecar found, synthesizing series with default CT attributes"
        );
        MetadataSidecar::minimal(&volume.geometry, volume.in_plane_shape())
    };
    sidecar.synthesize_series(&volume, out_dir)
}

/// Write a processed volume back into the best matching series under `reference`.
pub fn reinject_nifti(
    nifti: &Path,
    reference: &Path,
    out_dir: &Path,
    options: ReinjectOptions,
) -> Result<ReinjectReport> {
    let volume = nifti_io::read_volume(nifti)?;
    let set = SeriesGrouper::scan(reference, SortBy::default())?;
    let series = SeriesMatcher::best_match(&volume, &set)?;
    SliceReinjector::new(options).reinject(series, &volume, out_dir)
}

/// One case moving through the batch pipeline.
///
/// Owns `<work_root>/<label>/{nifti_in,nifti_out}` exclusively for the
/// duration of the run.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub label: String,
    pub case_dir: PathBuf,
    pub work_dir: PathBuf,
    pub destination: PathBuf,
    /// Directory receiving a copy of the selected volume, if any.
    pub nifti_destination: Option<PathBuf>,
    /// Whether subdirectories of `case_dir` belong to the case. False for the
    /// input root, whose subdirectories are cases of their own.
    pub recursive: bool,
}

impl ConversionJob {
    pub fn new(input_root: &Path, case_dir: &Path, output_root: &Path, config: &PipelineConfig) -> Self {
        let relative = relative_case_path(input_root, case_dir);
        let label = case_label(&relative);
        Self {
            work_dir: config.work_root.join(&label),
            destination: output_root.join(&relative),
            nifti_destination: config.nifti_root_out.as_ref().map(|root| root.join(&relative)),
            case_dir: case_dir.to_path_buf(),
            recursive: case_dir != input_root,
            label,
        }
    }

    pub fn nifti_in(&self) -> PathBuf {
        self.work_dir.join("nifti_in")
    }

    pub fn nifti_out(&self) -> PathBuf {
        self.work_dir.join("nifti_out")
    }

    /// Recreate an empty working directory.
    pub fn prepare(&self) -> Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(self.nifti_in())?;
        fs::create_dir_all(self.nifti_out())?;
        Ok(())
    }

    pub fn teardown(&self) -> Result<()> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }
        Ok(())
    }
}

/// Path of `case_dir` relative to `input_root`. The root itself maps to its
/// own directory name so that no case destination contains another.
fn relative_case_path(input_root: &Path, case_dir: &Path) -> PathBuf {
    match case_dir.strip_prefix(input_root) {
        Ok(relative) if relative.components().next().is_some() => relative.to_path_buf(),
        _ => PathBuf::from(
            case_dir
                .file_name()
                .map_or_else(|| "case".into(), |name| name.to_os_string()),
        ),
    }
}

/// Relative case path with separators replaced by `__`.
pub fn case_label(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("__")
}

/// The root itself when it directly holds DICOM files, plus every immediate
/// subdirectory that does, in name order. A root case covers only the files
/// directly inside the root (see [`ConversionJob::recursive`]).
pub fn discover_cases(root: &Path) -> Result<Vec<PathBuf>> {
    let mut cases = Vec::new();
    if has_dicom_files(root) {
        cases.push(root.to_path_buf());
    }

    let mut subdirs: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    cases.extend(subdirs.into_iter().filter(|dir| has_dicom_files(dir)));

    if cases.is_empty() {
        return Err(Error::NoSeriesFound {
            root: root.to_path_buf(),
        });
    }
    Ok(cases)
}

#[derive(Debug, Clone)]
pub struct CaseReport {
    pub label: String,
    pub series_uid: String,
    pub selected: PathBuf,
    pub changed_voxels: Option<usize>,
    pub reinject: ReinjectReport,
    pub published_nifti: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<CaseReport>,
    pub failed: Vec<CaseError>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Batch defacing run over a [`DefacingModel`].
pub struct Pipeline<M> {
    config: PipelineConfig,
    model: M,
}

impl<M: DefacingModel + Sync> Pipeline<M> {
    pub fn new(config: PipelineConfig, model: M) -> Self {
        Self { config, model }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every case under `input_root`, mirroring results into `output_root`.
    ///
    /// # Errors
    ///
    /// Only case discovery failures are returned; per-case failures are
    /// collected in the [`BatchReport`].
    pub async fn run_batch(&self, input_root: &Path, output_root: &Path) -> Result<BatchReport> {
        let cases = discover_cases(input_root)?;
        info!(
            root = %input_root.display(),
            cases = cases.len(),
            workers = self.config.workers,
            "starting batch"
        );
        fs::create_dir_all(output_root)?;

        let jobs: Vec<ConversionJob> = cases
            .iter()
            .map(|case_dir| ConversionJob::new(input_root, case_dir, output_root, &self.config))
            .collect();

        let results: Vec<std::result::Result<CaseReport, CaseError>> = stream::iter(jobs)
            .map(|job| {
                let span = info_span!("case", case = %job.label);
                self.process_case(job).instrument(span)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut report = BatchReport::default();
        for result in results {
            match result {
                Ok(case) => report.succeeded.push(case),
                Err(failure) => {
                    error!(%failure, "case failed");
                    report.failed.push(failure);
                }
            }
        }
        report.succeeded.sort_by(|a, b| a.label.cmp(&b.label));
        report.failed.sort_by(|a, b| a.case.cmp(&b.case));
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        Ok(report)
    }

    /// Run one case through every stage. The working directory is removed
    /// after a successful run unless intermediates are retained; a failed
    /// case keeps it for inspection.
    pub async fn process_case(&self, job: ConversionJob) -> std::result::Result<CaseReport, CaseError> {
        info!(case_dir = %job.case_dir.display(), "processing case");
        let report = self.run_stages(&job).await?;

        if self.config.keep_intermediate {
            debug!(work_dir = %job.work_dir.display(), "keeping intermediate files");
        } else if let Err(error) = job.teardown() {
            warn!(work_dir = %job.work_dir.display(), %error, "failed to remove working directory");
        }
        Ok(report)
    }

    async fn run_stages(&self, job: &ConversionJob) -> std::result::Result<CaseReport, CaseError> {
        let case = job.label.as_str();
        job.prepare().at(case, Stage::Group)?;

        let case_dir = job.case_dir.clone();
        let recursive = job.recursive;
        let set: SeriesSet = blocking(move || {
            if recursive {
                SeriesGrouper::scan(case_dir, SortBy::default())
            } else {
                SeriesGrouper::scan_dir(case_dir, SortBy::default())
            }
        })
        .await
        .at(case, Stage::Group)?;

        let series = set
            .primary()
            .cloned()
            .ok_or_else(|| Error::NoSeriesFound {
                root: job.case_dir.clone(),
            })
            .at(case, Stage::Group)?;
        let nifti_in = job.nifti_in();
        let assembled = blocking(move || VolumeLoader::assemble_to(&series, nifti_in, series.uid()))
            .await
            .at(case, Stage::Assemble)?;

        let request = ModelRequest {
            input_dir: job.nifti_in(),
            output_dir: job.nifti_out(),
        };
        let output = self.model.invoke(&request).await.at(case, Stage::Model)?;

        let input = assembled.volume;
        let selection: Selection = blocking(move || CandidateSelector::select(&output, &input))
            .await
            .at(case, Stage::Select)?;

        let (series, selection) = blocking(move || {
            let series: Series = SeriesMatcher::best_match(&selection.volume, &set)?.clone();
            Ok((series, selection))
        })
        .await
        .at(case, Stage::Match)?;

        let series_uid = series.uid().to_string();
        let reinjector = SliceReinjector::new(self.config.reinject_options());
        let destination = job.destination.clone();
        let Selection {
            path: selected,
            volume,
            changed_voxels,
        } = selection;
        let reinject = blocking(move || reinjector.reinject(&series, &volume, destination))
            .await
            .at(case, Stage::Reinject)?;

        let published_nifti = match &job.nifti_destination {
            Some(dir) => Some(publish_nifti(&selected, dir).at(case, Stage::Publish)?),
            None => None,
        };

        info!(
            series = %series_uid,
            destination = %reinject.destination.display(),
            "case done"
        );
        Ok(CaseReport {
            label: job.label.clone(),
            series_uid,
            selected,
            changed_voxels,
            reinject,
            published_nifti,
        })
    }
}

fn publish_nifti(selected: &Path, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = selected.file_name().ok_or_else(|| Error::UnsupportedVolume {
        path: selected.to_path_buf(),
        reason: "no file name".to_string(),
    })?;
    let target = dir.join(name);
    fs::copy(selected, &target)?;
    info!(target = %target.display(), "copied selected NIfTI");
    Ok(target)
}

/// Run CPU-bound work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}
