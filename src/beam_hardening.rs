//! Beam-hardening correction.
//!
//! Polychromatic beams harden as they traverse matter, so measured line
//! integrals grow sub-linearly with path length. A cubic polynomial per tube
//! voltage maps them back. Voltages without a calibration are left alone.

use std::collections::BTreeMap;

/// Calibration polynomials `a·P + b·P² + c·P³`, keyed by tube voltage in kV
#[derive(Clone, Debug, PartialEq)]
pub struct BeamHardening {
    table: BTreeMap<u32, [f64; 3]>,
}

impl BeamHardening {

    /// No calibrations at all: every voltage is left uncorrected
    pub fn none() -> Self { Self { table: BTreeMap::new() } }

    pub fn with(mut self, kvp: u32, coefficients: [f64; 3]) -> Self {
        self.insert(kvp, coefficients);
        self
    }

    pub fn insert(&mut self, kvp: u32, coefficients: [f64; 3]) {
        self.table.insert(kvp, coefficients);
    }

    pub fn coefficients(&self, kvp: u32) -> Option<[f64; 3]> {
        self.table.get(&kvp).copied()
    }

    /// The correction to apply to every sample of a scan taken at `kvp`
    pub fn polynomial(&self, kvp: u32) -> Polynomial {
        match self.coefficients(kvp) {
            Some(c) => Polynomial::Cubic(c),
            None    => Polynomial::Identity,
        }
    }
}

impl Default for BeamHardening {
    fn default() -> Self {
        Self::none()
            .with(45, [0.8346, 0.1656,  0.0069])
            .with(55, [0.8260, 0.2111, -0.0042])
            .with(65, [0.8159, 0.2636, -0.0195])
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Polynomial {
    Identity,
    Cubic([f64; 3]),
}

impl Polynomial {
    #[inline]
    pub fn apply(&self, p: f64) -> f64 {
        match *self {
            Polynomial::Identity => p,
            Polynomial::Cubic([a, b, c]) => p * (a + p * (b + p * c)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use rstest::rstest;

    #[rstest(/**/ kvp, p, expected,
             case(45, 1.0, 0.8346 + 0.1656 + 0.0069),
             case(55, 2.0, 0.8260 * 2.0 + 0.2111 * 4.0 - 0.0042 * 8.0),
             case(65, 0.5, 0.8159 * 0.5 + 0.2636 * 0.25 - 0.0195 * 0.125),
             case(50, 1.7, 1.7),
             case( 0, 3.0, 3.0),
    )]
    fn default_calibrations(kvp: u32, p: f64, expected: f64) {
        let bh = BeamHardening::default();
        assert_float_eq!(bh.polynomial(kvp).apply(p), expected, rmax <= 1e-12);
    }

    #[test]
    fn calibrations_can_be_replaced_and_added() {
        let bh = BeamHardening::default()
            .with(55, [1.0, 0.0, 0.0])
            .with(80, [0.0, 1.0, 0.0]);
        assert_eq!(bh.polynomial(55).apply(2.5), 2.5);
        assert_eq!(bh.polynomial(80).apply(3.0), 9.0);
        assert_eq!(BeamHardening::none().polynomial(45), Polynomial::Identity);
    }
}
