//! Frequency-domain ramp filters for filtered backprojection.
//!
//! A [`FilterKernel`] holds `2 × rows` real gains, one per bin of the
//! zero-padded FFT of a detector column. The lower half is a ramp `|f|`
//! apodized by a window and truncated at the cutoff; the upper half mirrors it
//! about Nyquist.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};

/// Apodization window applied to the ramp
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterKind {
    RamLak,
    SheppLogan,
    Hamming,
    Hann,
    Cosine,
    /// Anything else: the kernel degenerates to unity, i.e. no filtering
    Unknown(String),
}

impl FromStr for FilterKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use FilterKind::*;
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Ok(match normalized.as_str() {
            "ram-lak" | "ramlak" | "ramp" => RamLak,
            "shepp-logan"                 => SheppLogan,
            "hamming"                     => Hamming,
            "hann" | "hanning"            => Hann,
            "cosine"                      => Cosine,
            _                             => Unknown(s.to_string()),
        })
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use FilterKind::*;
        match self {
            RamLak     => write!(f, "ram-lak"),
            SheppLogan => write!(f, "shepp-logan"),
            Hamming    => write!(f, "hamming"),
            Hann       => write!(f, "hann"),
            Cosine     => write!(f, "cosine"),
            Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl Default for FilterKind {
    fn default() -> Self { FilterKind::RamLak }
}

// ----- Cutoff ----------------------------------------------------------------------------

/// Fraction of the Nyquist frequency above which the kernel is zero. In `(0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Cutoff(f64);

#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("filter cutoff must lie in (0, 1], got {0}")]
pub struct InvalidCutoff(pub f64);

impl Cutoff {
    pub const NYQUIST: Cutoff = Cutoff(1.0);

    pub fn new(c: f64) -> Result<Self, InvalidCutoff> {
        if c > 0.0 && c <= 1.0 { Ok(Self(c)) }
        else                   { Err(InvalidCutoff(c)) }
    }

    pub fn get(self) -> f64 { self.0 }
}

impl TryFrom<f64> for Cutoff {
    type Error = InvalidCutoff;
    fn try_from(c: f64) -> Result<Self, Self::Error> { Self::new(c) }
}

impl Default for Cutoff {
    fn default() -> Self { Self::NYQUIST }
}

// ----- Kernel ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct FilterKernel {
    gains: Vec<f32>,
}

impl FilterKernel {

    /// All-ones kernel: convolution with it leaves the data unchanged
    pub fn unity(rows: usize) -> Self {
        Self { gains: vec![1.0; 2 * rows] }
    }

    pub fn new(kind: &FilterKind, cutoff: Cutoff, rows: usize) -> Self {
        use FilterKind::*;
        let n = 2 * rows;
        let c = cutoff.get();
        let mut g: Vec<f64> = vec![0.0; n.max(rows + 1)];

        if let Unknown(name) = kind {
            warn!("Unknown filter '{name}': projections will not be filtered");
            for x in &mut g[..=rows] { *x = 1.0; }
        } else {
            let r = rows as f64;
            for (i, x) in g[..=rows].iter_mut().enumerate() { *x = i as f64 / r; }
            let first_cut = (r * c).floor() as usize + 1;
            for x in g.iter_mut().take(rows + 1).skip(first_cut) { *x = 0.0; }
            for (i, x) in g.iter_mut().enumerate().take(rows + 1).skip(1) {
                let w = PI * i as f64 / r;
                *x *= match kind {
                    SheppLogan => { let a = w / (2.0 * c); a.sin() / a }
                    Hamming    => 0.54 + 0.46 * (w / c).cos(),
                    Hann       => (1.0 + (w / c).cos()) / 2.0,
                    Cosine     => (w / (2.0 * c)).cos(),
                    RamLak | Unknown(_) => 1.0,
                };
            }
            info!("Built {kind} filter for {rows} detector rows, cutoff {c}");
        }

        for i in rows + 1..n {
            g[i] = g[n - i];
        }
        g.truncate(n);
        Self { gains: g.into_iter().map(|x| x as f32).collect() }
    }

    pub fn gains(&self) -> &[f32] { &self.gains }
    pub fn len   (&self) -> usize  { self.gains.len() }
    pub fn is_empty(&self) -> bool { self.gains.is_empty() }
}

impl std::ops::Index<usize> for FilterKernel {
    type Output = f32;
    fn index(&self, i: usize) -> &f32 { &self.gains[i] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    fn all_kinds() -> Vec<FilterKind> {
        use FilterKind::*;
        vec![RamLak, SheppLogan, Hamming, Hann, Cosine, Unknown("butterworth".into())]
    }

    #[rstest(/**/ name, expected,
             case("ram-lak"    , FilterKind::RamLak),
             case("Ram-Lak"    , FilterKind::RamLak),
             case("shepp_logan", FilterKind::SheppLogan),
             case("Hamming"    , FilterKind::Hamming),
             case("hanning"    , FilterKind::Hann),
             case("cosine"     , FilterKind::Cosine),
             case("parzen"     , FilterKind::Unknown("parzen".into())),
    )]
    fn parse_filter_names(name: &str, expected: FilterKind) {
        assert_eq!(name.parse::<FilterKind>().unwrap(), expected);
    }

    #[rstest(/**/ c, ok,
             case( 1.0  , true ),
             case( 0.5  , true ),
             case( 1e-9 , true ),
             case( 0.0  , false),
             case(-0.3  , false),
             case( 1.01 , false),
             case(f64::NAN, false),
    )]
    fn cutoff_range(c: f64, ok: bool) {
        assert_eq!(Cutoff::new(c).is_ok(), ok);
    }

    #[test]
    fn ram_lak_is_a_plain_ramp() {
        let k = FilterKernel::new(&FilterKind::RamLak, Cutoff::NYQUIST, 8);
        let expected = [0.0, 0.125, 0.25, 0.375, 0.5, 0.625, 0.75, 0.875,
                        1.0, 0.875, 0.75, 0.625, 0.5, 0.375, 0.25, 0.125];
        assert_eq!(k.len(), 16);
        for (got, want) in k.gains().iter().zip(expected) {
            assert_float_eq!(*got, want, ulps <= 1);
        }
    }

    #[test]
    fn cutoff_zeroes_high_frequencies() {
        // floor(8 * 0.5) + 1 = 5: bins 5..=8 and their mirrors vanish
        let k = FilterKernel::new(&FilterKind::RamLak, Cutoff::new(0.5).unwrap(), 8);
        assert_float_eq!(k[4], 0.5, ulps <= 1);
        for i in 5..=11 { assert_eq!(k[i], 0.0, "bin {i}"); }
        assert_float_eq!(k[12], 0.5, ulps <= 1);
    }

    #[rstest(/**/ kind, bin, expected,
             // rows = 4, cutoff 1: G = i/4, w = πi/4
             case(FilterKind::Hann      , 2, 0.5 * (1.0 + (PI / 2.0).cos()) / 2.0),
             case(FilterKind::Hamming   , 1, 0.25 * (0.54 + 0.46 * (PI / 4.0).cos())),
             case(FilterKind::Cosine    , 3, 0.75 * (3.0 * PI / 8.0).cos()),
             case(FilterKind::SheppLogan, 2, 0.5 * (PI / 4.0).sin() / (PI / 4.0)),
             case(FilterKind::Hann      , 4, 0.0),
    )]
    fn windows_by_hand(kind: FilterKind, bin: usize, expected: f64) {
        let k = FilterKernel::new(&kind, Cutoff::NYQUIST, 4);
        assert_float_eq!(k[bin] as f64, expected, abs <= 1e-7);
    }

    #[test]
    fn unknown_family_gives_unity() {
        let k = FilterKernel::new(&FilterKind::Unknown("?".into()), Cutoff::NYQUIST, 6);
        assert_eq!(k, FilterKernel::unity(6));
    }

    #[test]
    fn dc_is_always_blocked_by_known_families() {
        for kind in all_kinds().into_iter().filter(|k| !matches!(k, FilterKind::Unknown(_))) {
            assert_eq!(FilterKernel::new(&kind, Cutoff::NYQUIST, 16)[0], 0.0, "{kind}");
        }
    }

    proptest! {
        #[test]
        fn kernels_are_symmetric_about_nyquist(
            rows   in 1_usize..300,
            cutoff in 0.01_f64..=1.0,
            which  in 0_usize..6,
        ) {
            let kind = &all_kinds()[which];
            let k = FilterKernel::new(kind, Cutoff::new(cutoff).unwrap(), rows);
            prop_assert_eq!(k.len(), 2 * rows);
            for i in rows + 1..2 * rows {
                prop_assert_eq!(k[i], k[2 * rows - i]);
            }
        }
    }
}
