// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Math Kernels
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Numerical kernels shared by the inversion: dense solves, window
//! tapers, waveform measures and spherical geometry.

pub mod geo;
pub mod linalg;
pub mod signal;
pub mod taper;
