// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — CMT Inversion
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Centroid-moment-tensor source inversion.
//!
//! The crate splits into the windowed misfit engine ([`misfit`]), the
//! station weighting scheme ([`weights`]), forward-simulation
//! orchestration ([`sim`], [`exec`]), the event-level driver
//! ([`driver`]) and the Gauss-Newton optimizer with a strong-Wolfe
//! line search ([`optimizer`]).

pub mod driver;
pub mod exec;
pub mod measure;
pub mod misfit;
pub mod optimizer;
pub mod sim;
pub mod weights;
