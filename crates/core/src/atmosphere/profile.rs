//! Vertical wind profiles
//!
//! Extends a surface wind known at one height to any height above ground.
//! Heights passed to [`WindProfile::speed_at`] are above the ground surface;
//! the log and similarity profiles are measured from the displacement
//! height `d`, so the input wind sits at `h_in + rough_h - d` on that axis.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Exponent of the power-law profile
pub const POWER_LAW_EXPONENT: f64 = 0.143;

/// Vertical profile law
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProfileKind {
    /// Same speed at every height above ground
    Uniform,
    /// Neutral log law
    Logarithmic,
    /// Power law with exponent 0.143
    PowerLaw,
    /// Log law corrected by the Monin-Obukhov stability function
    #[default]
    MoninObukhov,
}

/// Surface wind and surface-layer parameters for one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindProfile {
    pub kind: ProfileKind,
    /// Speed at `input_height` (m/s)
    pub input_speed: f64,
    /// Input height above the top of the roughness elements (m)
    pub input_height: f64,
    /// Roughness length z0 (m)
    pub roughness_length: f64,
    /// Roughness element height (m)
    pub roughness_height: f64,
    /// Displacement height d (m)
    pub displacement_height: f64,
    /// Obukhov length L (m); 0 means neutral
    pub obukhov_length: f64,
    /// Atmospheric boundary layer depth (m)
    pub abl_height: f64,
}

impl WindProfile {
    /// Height of the input wind on the log-profile axis (above d)
    #[inline]
    pub fn effective_input_height(&self) -> f64 {
        self.input_height + self.roughness_height - self.displacement_height
    }

    /// Wind speed at `agl` meters above ground
    pub fn speed_at(&self, agl: f64) -> f64 {
        if agl == 0.0 {
            return 0.0;
        }
        let z0 = self.roughness_length;
        let d = self.displacement_height;
        match self.kind {
            ProfileKind::Uniform => self.input_speed,
            ProfileKind::Logarithmic => {
                if agl < d + z0 {
                    return 0.0;
                }
                self.input_speed * ((agl - d) / z0).ln() / (self.effective_input_height() / z0).ln()
            }
            ProfileKind::PowerLaw => {
                self.input_speed * (agl / self.input_height).powf(POWER_LAW_EXPONENT)
            }
            ProfileKind::MoninObukhov => {
                let z1 = self.effective_input_height();
                let l = self.obukhov_length;
                if z1 < z0 {
                    // Log law undefined at the input height: linear to the ground
                    return self.input_speed * (agl / (z1 + d));
                }
                if agl < d + 7.0 * z0 {
                    let at_7z0 = monin_obukhov(7.0 * z0, self.input_speed, z1, z0, l);
                    at_7z0 * (agl / (7.0 * z0 + d))
                } else if agl < d + self.abl_height {
                    monin_obukhov(agl - d, self.input_speed, z1, z0, l)
                } else {
                    monin_obukhov(self.abl_height, self.input_speed, z1, z0, l)
                }
            }
        }
    }
}

/// Similarity-theory speed at height `z` given speed `u1` at `z1`
pub fn monin_obukhov(z: f64, u1: f64, z1: f64, z0: f64, obukhov_length: f64) -> f64 {
    if obukhov_length == 0.0 {
        return u1 * (z / z0).ln() / (z1 / z0).ln();
    }
    let l = obukhov_length;
    u1 * ((z / z0).ln() - stability_psi(z / l, l)) / ((z1 / z0).ln() - stability_psi(z1 / l, l))
}

/// Integrated stability correction ψ(z/L)
///
/// Stable branch after van Ulden and Holtslag (1985); unstable branch is the
/// Businger-Dyer form.
pub fn stability_psi(z_over_l: f64, obukhov_length: f64) -> f64 {
    if obukhov_length >= 0.0 {
        -17.0 * (1.0 - (-0.29 * z_over_l).exp())
    } else {
        let x = (1.0 - 16.0 * z_over_l).powf(0.25);
        2.0 * ((1.0 + x) / 2.0).ln() + ((1.0 + x * x) / 2.0).ln() - 2.0 * x.atan() + PI / 2.0
    }
}
