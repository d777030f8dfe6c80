// ─────────────────────────────────────────────────────────────────────
// SCPN Seismo Core — Property-Based Tests (proptest) for cmt-types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for cmt-types using proptest.
//!
//! Covers: keyed source text round trip, scalar moment, parameter
//! dictionary scaling, window merging.

use cmt_types::params::{Param, ParamDict, ParamSpec, TENSOR_PARAMS};
use cmt_types::source::CmtSource;
use cmt_types::stream::{merge_windows, Window};
use proptest::prelude::*;

fn arb_source() -> impl Strategy<Value = CmtSource> {
    (
        (
            -60.0f64..60.0,
            -180.0f64..180.0,
            1_000.0f64..700_000.0,
            -50.0f64..100.0,
            0.1f64..40.0,
        ),
        prop::array::uniform6(-5.0f64..5.0),
    )
        .prop_map(|((lat, lon, depth, shift, hdur), m)| CmtSource {
            event_name: "C000000000000A".to_string(),
            origin_time: 0.0,
            time_shift: shift,
            half_duration: hdur,
            latitude: lat,
            longitude: lon,
            depth_in_m: depth,
            m_rr: m[0] * 1.0e24,
            m_tt: m[1] * 1.0e24,
            m_pp: m[2] * 1.0e24,
            m_rt: m[3] * 1.0e24,
            m_rp: m[4] * 1.0e24,
            m_tp: m[5] * 1.0e24,
        })
}

// ── Source Properties ────────────────────────────────────────────────

proptest! {
    /// Writing and re-parsing the keyed text format is lossless.
    #[test]
    fn source_keyed_text_round_trip(src in arb_source()) {
        let parsed = CmtSource::from_keyed_text(&src.to_keyed_text()).unwrap();
        prop_assert_eq!(parsed, src);
    }

    /// The scalar moment is non-negative and zero only for the zero tensor.
    #[test]
    fn scalar_moment_nonnegative(src in arb_source()) {
        let m0 = src.m0();
        prop_assert!(m0.is_finite());
        prop_assert!(m0 >= 0.0);
        if src.tensor().iter().any(|&m| m != 0.0) {
            prop_assert!(m0 > 0.0);
        }
    }

    /// Scaling the full tensor by a factor scales M0 by the same factor.
    #[test]
    fn scalar_moment_homogeneous(src in arb_source(), k in 0.1f64..10.0) {
        prop_assume!(src.m0() > 0.0);
        let mut scaled = src.clone();
        for par in TENSOR_PARAMS {
            scaled.set_param(par, k * src.param_value(par));
        }
        let ratio = scaled.m0() / src.m0();
        prop_assert!((ratio - k).abs() < 1e-9 * k,
            "M0 ratio {} vs factor {}", ratio, k);
    }
}

// ── Parameter Dictionary Properties ──────────────────────────────────

proptest! {
    /// Every tensor entry of the scale vector equals the source's scalar
    /// moment, regardless of dictionary order.
    #[test]
    fn scale_vector_tensor_entries_are_m0(src in arb_source(), depth_first in any::<bool>()) {
        prop_assume!(src.m0() > 0.0);
        let mut entries: Vec<(Param, ParamSpec)> = TENSOR_PARAMS
            .iter()
            .map(|p| (*p, ParamSpec { scale: 1.0, pert: None }))
            .collect();
        let depth = (Param::Depth, ParamSpec { scale: 1000.0, pert: None });
        if depth_first {
            entries.insert(0, depth);
        } else {
            entries.push(depth);
        }
        let dict = ParamDict::new(entries).unwrap();
        let scale = dict.scale_vector(&src).unwrap();
        for (i, par) in dict.params().enumerate() {
            if par.is_tensor() {
                prop_assert!((scale[i] - src.m0()).abs() < 1e-9 * src.m0());
            } else {
                prop_assert!((scale[i] - 1000.0).abs() < 1e-12);
            }
        }
    }

    /// Non-dimensionalizing the model vector and re-applying the scales
    /// recovers the physical values to floating-point roundoff.
    #[test]
    fn scale_round_trip_recovers_model(src in arb_source()) {
        prop_assume!(src.m0() > 0.0);
        let mut entries: Vec<(Param, ParamSpec)> = TENSOR_PARAMS
            .iter()
            .map(|p| (*p, ParamSpec { scale: 1.0, pert: Some(1.0e23) }))
            .collect();
        entries.push((Param::Depth, ParamSpec { scale: 1000.0, pert: None }));
        entries.push((Param::TimeShift, ParamSpec { scale: 10.0, pert: None }));
        let dict = ParamDict::new(entries).unwrap();
        let model = dict.model_vector(&src);
        let scale = dict.scale_vector(&src).unwrap();
        for (m, s) in model.iter().zip(&scale) {
            let back = (m / s) * s;
            prop_assert!((back - m).abs() <= 1e-12 * m.abs().max(1.0),
                "{} descaled and rescaled to {}", m, back);
        }
    }

    /// Model vector and dictionary have the same length and ordering.
    #[test]
    fn model_vector_matches_order(src in arb_source()) {
        let dict = ParamDict::new(vec![
            (Param::TimeShift, ParamSpec { scale: 1.0, pert: None }),
            (Param::Depth, ParamSpec { scale: 1000.0, pert: None }),
            (Param::Latitude, ParamSpec { scale: 0.1, pert: Some(0.001) }),
        ])
        .unwrap();
        let m = dict.model_vector(&src);
        prop_assert_eq!(m.len(), dict.len());
        prop_assert_eq!(m[0], src.time_shift);
        prop_assert_eq!(m[1], src.depth_in_m);
        prop_assert_eq!(m[2], src.latitude);
    }
}

// ── Window Merge Properties ──────────────────────────────────────────

fn arb_windows() -> impl Strategy<Value = Vec<Window>> {
    prop::collection::vec((0usize..500, 1usize..80), 0..12).prop_map(|pairs| {
        pairs
            .into_iter()
            .filter_map(|(left, len)| Window::new(left, left + len, 0.0))
            .collect()
    })
}

proptest! {
    /// Merged windows are sorted and pairwise disjoint.
    #[test]
    fn merged_windows_disjoint_sorted(wins in arb_windows()) {
        let merged = merge_windows(wins);
        for pair in merged.windows(2) {
            prop_assert!(pair[0].right < pair[1].left,
                "windows [{}, {}) and [{}, {}) touch or overlap",
                pair[0].left, pair[0].right, pair[1].left, pair[1].right);
        }
    }

    /// Merging preserves the set of covered samples exactly.
    #[test]
    fn merged_windows_cover_same_samples(wins in arb_windows()) {
        let mut covered = vec![false; 600];
        for w in &wins {
            for s in w.left..w.right {
                covered[s] = true;
            }
        }
        let merged = merge_windows(wins);
        let mut covered_after = vec![false; 600];
        for w in &merged {
            for s in w.left..w.right {
                covered_after[s] = true;
            }
        }
        prop_assert_eq!(covered, covered_after);
    }

    /// Merging is idempotent.
    #[test]
    fn merge_idempotent(wins in arb_windows()) {
        let once = merge_windows(wins);
        let twice = merge_windows(once.clone());
        prop_assert_eq!(once, twice);
    }
}
