//! Configuration file parser for reconstruction runs

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, de};
use thiserror::Error;

use units::{kv_, mm, mm_, ElectricPotential, Length};

use crate::beam_hardening::BeamHardening;
use crate::filter::{Cutoff, FilterKind};
use crate::geometry::Geometry;
use crate::projection::EdgePolicy;
use crate::types::VolumeDim_u;

fn deserialize_uom_opt<'d, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(de::Error::custom)
}

fn deserialize_uom<'d, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    deserialize_parsed(deserializer)
}

fn deserialize_parsed<'d, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    String::deserialize(deserializer)?
        .parse::<T>()
        .map_err(de::Error::custom)
}

fn deserialize_cutoff<'d, D: Deserializer<'d>>(deserializer: D) -> Result<Cutoff, D::Error> {
    Cutoff::new(f64::deserialize(deserializer)?).map_err(de::Error::custom)
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {

    /// Number of voxels along x and y
    #[serde(default = "default_nxy")]
    pub nxy: usize,

    /// Number of slices
    #[serde(default = "default_nz")]
    pub nz: usize,

    /// Voxel size
    #[serde(default = "default_resolution")]
    #[serde(deserialize_with = "deserialize_uom")]
    pub resolution: Length,

    #[serde(default)]
    #[serde(deserialize_with = "deserialize_parsed")]
    pub filter: FilterKind,

    #[serde(default)]
    #[serde(deserialize_with = "deserialize_cutoff")]
    pub cutoff: Cutoff,

    /// Voxels above this value are treated as metal
    #[serde(default = "default_metal_threshold")]
    pub metal_threshold: f32,

    #[serde(default)]
    pub edge_policy: EdgePolicy,

    #[serde(default)]
    pub geometry: GeometryOverrides,

    /// Replace or extend the default beam-hardening calibrations
    #[serde(default)]
    pub beam_hardening: Vec<BeamHardeningEntry>,
}

/// Values which take precedence over those found in the device headers
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeometryOverrides {
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_uom_opt")]
    pub source_to_detector: Option<Length>,

    #[serde(default)]
    #[serde(deserialize_with = "deserialize_uom_opt")]
    pub source_to_axis: Option<Length>,

    #[serde(default)]
    #[serde(deserialize_with = "deserialize_uom_opt")]
    pub detector_pitch: Option<Length>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BeamHardeningEntry {
    #[serde(deserialize_with = "deserialize_uom")]
    pub kvp: ElectricPotential,
    pub coefficients: [f64; 3],
}

fn default_nxy            () -> usize  { 128 }
fn default_nz             () -> usize  { 128 }
fn default_resolution     () -> Length { mm(0.1) }
fn default_metal_threshold() -> f32    { 10.0 }

impl Default for Config {
    fn default() -> Self {
        Self {
            nxy            : default_nxy(),
            nz             : default_nz(),
            resolution     : default_resolution(),
            filter         : FilterKind::default(),
            cutoff         : Cutoff::default(),
            metal_threshold: default_metal_threshold(),
            edge_policy    : EdgePolicy::default(),
            geometry       : GeometryOverrides::default(),
            beam_hardening : vec![],
        }
    }
}

impl Config {

    /// `[slices, rows, cols]`
    pub fn dims(&self) -> VolumeDim_u { [self.nz, self.nxy, self.nxy] }

    /// Voxel size in mm
    pub fn resolution_mm(&self) -> f64 { mm_(self.resolution) }

    /// The default calibrations, updated with those in this file
    pub fn beam_hardening_table(&self) -> BeamHardening {
        self.beam_hardening.iter().fold(BeamHardening::default(), |table, entry| {
            table.with(kv_(entry.kvp).round() as u32, entry.coefficients)
        })
    }
}

impl GeometryOverrides {
    pub fn apply(&self, geometry: &mut Geometry) {
        if let Some(d) = self.source_to_detector { geometry.source_to_detector = mm_(d); }
        if let Some(d) = self.source_to_axis     { geometry.source_to_axis     = mm_(d); }
        if let Some(p) = self.detector_pitch     { geometry.detector_pitch     = mm_(p); }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("couldn't read config file `{path}`: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

pub fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let config: String = fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    Ok(toml::from_str(&config)?)
}
