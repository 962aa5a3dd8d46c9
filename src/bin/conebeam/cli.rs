/// Command line interface for `conebeam` executable
#[derive(clap::Parser, Debug, Clone)]
#[clap(
    name = "conebeam",
    about = "Cone-beam CT reconstruction with metal artifact removal",
)]
pub (super) struct Cli {
    /// TOML file with reconstruction parameters
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of rayon threads
    #[clap(short = 'j', long, default_value = "4")]
    pub threads: usize,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub (super) enum Command {

    /// Reconstruct the projections found in a directory
    Reconstruct {
        /// Directory of projection files
        dir: PathBuf,

        /// Stop after plain backprojection
        #[clap(long)]
        no_metal_removal: bool,

        #[clap(flatten)]
        recon: ReconArgs,

        #[clap(flatten)]
        output: Output,
    },

    /// Remove metal artifacts from a previously reconstructed volume
    RemoveMetal {
        /// Directory of projection files
        dir: PathBuf,

        /// Raw f32 volume reconstructed from the same projections
        #[clap(long)]
        volume: PathBuf,

        #[clap(flatten)]
        recon: ReconArgs,

        #[clap(flatten)]
        output: Output,
    },

    /// Render one slice of a raw volume as a PNG
    Preview {
        /// Raw f32 volume
        volume: PathBuf,

        /// Volume size in voxels: slices,rows,cols [default: from config]
        #[clap(short, long, value_parser = parse_triplet::<usize>)]
        dims: Option<(usize, usize, usize)>,

        /// Slice to render [default: central]
        #[clap(short, long)]
        slice: Option<usize>,

        /// PNG output file
        #[clap(short, long)]
        out: PathBuf,
    },
}

/// Settings which take precedence over the config file
#[derive(clap::Args, Debug, Clone)]
pub (super) struct ReconArgs {
    /// Number of voxels along x and y
    #[clap(long)]
    pub nxy: Option<usize>,

    /// Number of slices
    #[clap(long)]
    pub nz: Option<usize>,

    /// Voxel size
    #[clap(short, long)]
    pub resolution: Option<Length>,

    /// Ramp filter window: ram-lak, shepp-logan, hamming, hann or cosine
    #[clap(short, long)]
    pub filter: Option<FilterKind>,

    /// Window cutoff as a fraction of the Nyquist frequency
    #[clap(long)]
    pub cutoff: Option<f64>,

    /// Voxels above this value are treated as metal
    #[clap(short, long)]
    pub metal_threshold: Option<f32>,

    /// Masked runs at the detector edge: clamp or skip
    #[clap(long)]
    pub edge_policy: Option<EdgePolicy>,
}

impl ReconArgs {
    pub (super) fn apply(self, config: &mut Config) -> Result<(), InvalidCutoff> {
        if let Some(n) = self.nxy             { config.nxy             = n; }
        if let Some(n) = self.nz              { config.nz              = n; }
        if let Some(r) = self.resolution      { config.resolution      = r; }
        if let Some(f) = self.filter          { config.filter          = f; }
        if let Some(c) = self.cutoff          { config.cutoff          = Cutoff::new(c)?; }
        if let Some(t) = self.metal_threshold { config.metal_threshold = t; }
        if let Some(p) = self.edge_policy     { config.edge_policy     = p; }
        Ok(())
    }
}

#[derive(clap::Args, Debug, Clone)]
pub (super) struct Output {
    /// Raw f32 output volume
    #[clap(short, long)]
    pub out: PathBuf,

    /// Also write the volume as a DICOM CT image
    #[clap(long)]
    pub dicom: Option<PathBuf>,

    /// Also write the central slice as a PNG
    #[clap(long)]
    pub png: Option<PathBuf>,
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::path::PathBuf;
use units::Length;
use conebeam::{
    config::recon::Config,
    filter::{Cutoff, FilterKind, InvalidCutoff},
    projection::EdgePolicy,
    utils::parse_triplet,
};
