// SPDX-License-Identifier: Apache-2.0

//! Control-plane primitives: the PID controller used by the adaptive decider,
//! the [`ConfigPatch`] model exchanged between the decider and governance,
//! and the codec that carries patches through the pipeline as synthetic
//! `ctrl_proposed_patch` metrics.

pub mod codec;
pub mod error;
pub mod patch;
pub mod pid;

pub use codec::{PATCH_METRIC_NAME, decode_patch_point, decode_patches, encode_patch};
pub use error::{CodecError, ControlError};
pub use patch::{ConfigPatch, PatchValue, Severity};
pub use pid::{PidController, PidGains};
