mod cli;
mod progress;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    rayon::ThreadPoolBuilder::new().num_threads(args.threads).build_global()?;

    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None       => Config::default(),
    };

    match args.command {
        Command::Reconstruct { dir, no_metal_removal, recon, output } => {
            recon.apply(&mut config)?;
            let reconstruction = Reconstruction::new(config.dims(), config.resolution_mm());
            let session = open_session(&dir, &config, reconstruction)?;
            let job = if no_metal_removal { Job::Backproject }
                      else                { Job::Full { threshold: config.metal_threshold, policy: config.edge_policy } };
            let session = run_job(session, job)?;
            write_outputs(&session, &output)?;
        }
        Command::RemoveMetal { dir, volume, recon, output } => {
            recon.apply(&mut config)?;
            let reconstruction = Reconstruction::from_raw_file(config.dims(), config.resolution_mm(), &volume)?;
            let session = open_session(&dir, &config, reconstruction)?;
            let job = Job::RemoveMetal { threshold: config.metal_threshold, policy: config.edge_policy };
            let session = run_job(session, job)?;
            write_outputs(&session, &output)?;
        }
        Command::Preview { volume, dims, slice, out } => {
            let dims = dims.map(|(s, r, c)| [s, r, c]).unwrap_or_else(|| config.dims());
            let volume = Volume::from_raw_file(dims, config.resolution_mm(), &volume)?;
            let index = slice.unwrap_or_else(|| volume.central_index());
            if index >= volume.slices() {
                return Err(format!("slice {index} out of range: volume has {} slices", volume.slices()).into());
            }
            let slice = volume.data().index_axis(Axis(0), index).to_owned();
            save_slice_png(&slice, &out)?;
            info!("Slice {index} written to {}", out.display());
        }
    }
    Ok(())
}

fn open_session(dir: &Path, config: &Config, reconstruction: Reconstruction) -> Result<Session<DicomDirectorySource>, Box<dyn Error>> {
    let mut source = DicomDirectorySource::open(dir)?;
    config.geometry.apply(source.geometry_mut());
    let mut projection = Projection::new(source, &config.beam_hardening_table())?;
    projection.set_filter(&config.filter, config.cutoff);
    Ok(Session::new(projection, reconstruction))
}

/// Run `job` on a worker thread, showing its progress until it ends
fn run_job(session: Session<DicomDirectorySource>, job: Job) -> Result<Session<DicomDirectorySource>, Box<dyn Error>> {
    let passes: &[&'static str] = match job {
        Job::Backproject        => &["Backprojection"],
        Job::RemoveMetal { .. } => &["Metal artifact removal"],
        Job::Full { .. }        => &["Backprojection", "Metal artifact removal"],
    };
    let mut progress = progress::Progress::new(passes);
    let worker = session.spawn(job);
    for event in worker.events().iter() {
        progress.update(&event);
    }
    let (session, state) = worker.join()?;
    if state != RunState::Completed {
        return Err(format!("reconstruction ended in state {state:?}").into());
    }
    Ok(session)
}

fn write_outputs(session: &Session<DicomDirectorySource>, output: &Output) -> Result<(), Box<dyn Error>> {
    // If the directory where results will be written does not exist yet, make it
    for path in std::iter::once(&output.out).chain(&output.dicom).chain(&output.png) {
        if let Some(parent) = path.parent() { std::fs::create_dir_all(parent)?; }
    }
    let mut progress = timing::Progress::new();
    let volume = session.reconstruction.volume();

    progress.start(&format!("Writing raw volume to {}", output.out.display()));
    volume.write_raw(&output.out)?;
    progress.done();

    if let Some(path) = &output.dicom {
        progress.start(&format!("Writing DICOM image to {}", path.display()));
        write_dicom_series(volume, Some(session.projection.source().header()), path)?;
        progress.done();
    }
    if let Some(path) = &output.png {
        save_slice_png(&volume.central_slice(), path)?;
        progress.done_with_message(&format!("Central slice written to {}", path.display()));
    }
    Ok(())
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::error::Error;
use std::path::Path;

use clap::Parser;
use ndarray::Axis;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, Output};
use conebeam::{
    config::recon::{read_config_file, Config},
    io::{dicom::DicomDirectorySource, export::write_dicom_series},
    projection::Projection,
    reconstruction::{Reconstruction, RunState},
    session::{Job, Session},
    utils::timing,
    visualize::save_slice_png,
    volume::Volume,
};
