//! Lane-parallel arithmetic for the offload kernel.
//!
//! The build script selects one backend for the target and exposes it as
//! [`F32x4`]:
//!
//! | cfg        | Backend                  |
//! |------------|--------------------------|
//! | `sse`      | [`sse::F32x4`] (`__m128`) |
//! | `neon`     | `neon::F32x4` (`float32x4_t`) |
//! | `fallback` | [`portable::F32x4`]      |
//!
//! The portable backend is compiled on every target so the hardware backends
//! can be checked against it.

/// Number of `f32` lanes in one register.
pub const LANE_COUNT: usize = 4;

/// Alignment of a register's memory image, in bytes.
pub const LANE_ALIGNMENT: usize = 16;

pub mod traits;

pub mod portable;

#[cfg(sse)]
pub mod sse;

#[cfg(neon)]
pub mod neon;

pub mod reduce;

#[cfg(sse)]
pub use sse::F32x4;

#[cfg(neon)]
pub use neon::F32x4;

#[cfg(not(any(sse, neon)))]
pub use portable::F32x4;

pub use reduce::{horizontal_sum, normalize_total, reduce, reduce_values, reduce_with, Lanes, Reduction};
pub use traits::SimdVec;
