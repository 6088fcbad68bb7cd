use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dicom_deface::{
    CommandModel, Error, HeaderMode, Pipeline, PipelineConfig, ReinjectOptions,
    pipeline::{dicom_to_nifti, nifti_to_dicom, reinject_nifti},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a DICOM series to `<SeriesInstanceUID>_0000.nii.gz` plus its JSON sidecar
    Dicom2nii {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// SeriesInstanceUID to convert when the input holds several series
        #[arg(long)]
        series: Option<String>,
    },
    /// Build a DICOM series from a NIfTI volume and its sidecar
    Nii2dicom {
        #[arg(short, long)]
        nifti: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Sidecar to use instead of the one next to the volume
        #[arg(long)]
        sidecar: Option<PathBuf>,
    },
    /// Write a processed NIfTI volume back into the matching reference series
    Reinject {
        #[arg(short, long)]
        nifti: PathBuf,
        /// Directory holding the original DICOM series
        #[arg(short, long)]
        reference: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Mint new series/instance UIDs and annotate SeriesDescription
        #[arg(long)]
        mint: bool,
    },
    /// Run the defacing model over every case under the input root
    Deface {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Keep a copy of each selected NIfTI volume under this root
        #[arg(long)]
        nifti_root_out: Option<PathBuf>,
        /// Root for per-case working directories
        #[arg(short, long)]
        work: Option<PathBuf>,
        #[arg(long)]
        keep_intermediate: bool,
        #[arg(long)]
        mint: bool,
        /// Cases processed at the same time
        #[arg(long)]
        workers: Option<usize>,
        /// JSON pipeline configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Model command, invoked as `<command...> -i <nifti_in> -o <nifti_out>`
        #[arg(last = true)]
        model: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    match run(args.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!(%error, "aborted");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every case succeeded.
async fn run(command: Command) -> Result<bool, Error> {
    match command {
        Command::Dicom2nii {
            input,
            output,
            series,
        } => {
            let assembled = dicom_to_nifti(&input, &output, series.as_deref())?;
            info!(
                nifti = %assembled.nifti_path.display(),
                sidecar = %assembled.sidecar_path.display(),
                "conversion done"
            );
        }
        Command::Nii2dicom {
            nifti,
            output,
            sidecar,
        } => {
            let written = nifti_to_dicom(&nifti, &output, sidecar.as_deref())?;
            info!(slices = written.len(), output = %output.display(), "conversion done");
        }
        Command::Reinject {
            nifti,
            reference,
            output,
            mint,
        } => {
            let options = ReinjectOptions {
                header_mode: if mint { HeaderMode::Mint } else { HeaderMode::Preserve },
                ..Default::default()
            };
            let report = reinject_nifti(&nifti, &reference, &output, options)?;
            info!(files = report.files.len(), series = %report.series_uid, "reinjection done");
        }
        Command::Deface {
            input,
            output,
            nifti_root_out,
            work,
            keep_intermediate,
            mint,
            workers,
            config,
            model,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::from_file(path)?,
                None => PipelineConfig::default(),
            };
            if let Some((program, args)) = model.split_first() {
                config.model.program = Some(PathBuf::from(program));
                config.model.args = args.to_vec();
            }
            if nifti_root_out.is_some() {
                config.nifti_root_out = nifti_root_out;
            }
            if let Some(work) = work {
                config.work_root = work;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            config.keep_intermediate |= keep_intermediate;
            if mint {
                config.header_mode = HeaderMode::Mint;
            }

            let model: CommandModel = config.command_model().ok_or_else(|| {
                Error::ModelInvocation("no model command given (pass it after `--` or in --config)".to_string())
            })?;
            let pipeline = Pipeline::new(config, model);
            let report = pipeline.run_batch(&input, &output).await?;
            for failure in &report.failed {
                error!("{failure}");
            }
            info!(
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                total = report.total(),
                "batch summary"
            );
            return Ok(report.is_success());
        }
    }
    Ok(true)
}
