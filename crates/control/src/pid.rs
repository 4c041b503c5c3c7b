// SPDX-License-Identifier: Apache-2.0

//! Bounded PID computation with anti-windup.

use crate::error::ControlError;
use serde::{Deserialize, Serialize};

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

impl PidGains {
    fn validate(&self) -> Result<(), ControlError> {
        if !(self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()) {
            return Err(ControlError::InvalidGains {
                kp: self.kp,
                ki: self.ki,
                kd: self.kd,
            });
        }
        Ok(())
    }
}

/// A PID controller with output clamping, integral bounding and optional
/// back-calculation anti-windup.
///
/// All operations take `&mut self`; the owner serializes access. A rejected
/// reconfiguration leaves the previous configuration and state untouched.
#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    setpoint: f64,
    out_min: f64,
    out_max: f64,
    integral_limit: f64,
    anti_windup: bool,
    anti_windup_gain: f64,

    integral: f64,
    last_error: f64,
    clamped_low: bool,
    clamped_high: bool,
}

impl PidController {
    /// Creates a controller around a setpoint with symmetric unit output
    /// limits and an unbounded-ish integral.
    #[must_use]
    pub fn new(gains: PidGains, setpoint: f64) -> Self {
        Self {
            gains,
            setpoint,
            out_min: -1.0,
            out_max: 1.0,
            integral_limit: f64::MAX,
            anti_windup: false,
            anti_windup_gain: 0.0,
            integral: 0.0,
            last_error: 0.0,
            clamped_low: false,
            clamped_high: false,
        }
    }

    /// The configured setpoint.
    #[must_use]
    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// The configured output range `(min, max)`.
    #[must_use]
    pub fn output_limits(&self) -> (f64, f64) {
        (self.out_min, self.out_max)
    }

    /// The accumulated integral term.
    #[must_use]
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Whether the previous [`Self::compute`] hit the lower output limit.
    #[must_use]
    pub fn clamped_low(&self) -> bool {
        self.clamped_low
    }

    /// Whether the previous [`Self::compute`] hit the upper output limit.
    #[must_use]
    pub fn clamped_high(&self) -> bool {
        self.clamped_high
    }

    /// Replaces the gains.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidGains`] for non-finite gains; state is
    /// preserved.
    pub fn set_gains(&mut self, gains: PidGains) -> Result<(), ControlError> {
        gains.validate()?;
        self.gains = gains;
        Ok(())
    }

    /// Replaces the setpoint.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    /// Replaces the output limits.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidOutputLimits`] unless `min < max`.
    pub fn set_output_limits(&mut self, min: f64, max: f64) -> Result<(), ControlError> {
        if !(min < max) {
            return Err(ControlError::InvalidOutputLimits { min, max });
        }
        self.out_min = min;
        self.out_max = max;
        Ok(())
    }

    /// Replaces the integral bound.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidIntegralLimit`] for negative limits.
    pub fn set_integral_limit(&mut self, limit: f64) -> Result<(), ControlError> {
        if !(limit >= 0.0) {
            return Err(ControlError::InvalidIntegralLimit { limit });
        }
        self.integral_limit = limit;
        Ok(())
    }

    /// Enables or disables back-calculation anti-windup.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidAntiWindupGain`] for negative gains.
    pub fn set_anti_windup(&mut self, enabled: bool, gain: f64) -> Result<(), ControlError> {
        if !(gain >= 0.0) {
            return Err(ControlError::InvalidAntiWindupGain { gain });
        }
        self.anti_windup = enabled;
        self.anti_windup_gain = gain;
        Ok(())
    }

    /// Clears accumulated state (integral, last error, clamp flags).
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.clamped_low = false;
        self.clamped_high = false;
    }

    /// Runs one control step and returns the clamped output.
    ///
    /// `dt` is the elapsed time since the previous step, in seconds. A zero
    /// `dt` yields no derivative contribution and no integral growth.
    pub fn compute(&mut self, measurement: f64, dt: f64) -> f64 {
        let error = self.setpoint - measurement;

        let p = self.gains.kp * error;

        if dt > 0.0 {
            self.integral += self.gains.ki * error * dt;
            self.integral = self
                .integral
                .clamp(-self.integral_limit, self.integral_limit);
        }

        let d = if dt > 0.0 {
            self.gains.kd * (error - self.last_error) / dt
        } else {
            0.0
        };

        let raw = p + self.integral + d;
        let output = raw.clamp(self.out_min, self.out_max);
        self.clamped_low = output > raw;
        self.clamped_high = output < raw;

        if self.anti_windup && output != raw && dt > 0.0 {
            self.integral -= self.anti_windup_gain * (raw - output) * dt;
            self.integral = self
                .integral
                .clamp(-self.integral_limit, self.integral_limit);
        }

        self.last_error = error;
        output
    }
}
