#[cfg(not(miri))] // Skip property tests under miri as they're too slow
use proptest::prelude::*;
#[cfg(not(miri))]
use solys_tracker::{
    classify, generate_offsets, CalibrationParameters, ResponseKind, SweepPattern,
};

#[cfg(not(miri))]
fn sweep_params(
    azimuth: (f64, f64, f64),
    zenith: (f64, f64, f64),
) -> CalibrationParameters {
    CalibrationParameters {
        azimuth_min: azimuth.0,
        azimuth_max: azimuth.1,
        azimuth_step: azimuth.2,
        zenith_min: zenith.0,
        zenith_max: zenith.1,
        zenith_step: zenith.2,
        ..CalibrationParameters::default()
    }
}

#[cfg(not(miri))]
proptest! {
    #[test]
    fn classification_is_deterministic(reply in ".{0,64}", cmd in "[A-Z]{2}( [0-9])?") {
        let first = classify(&reply, &cmd, false);
        let second = classify(&reply, &cmd, false);
        prop_assert_eq!(first.kind, second.kind);
        prop_assert_eq!(first.numbers, second.numbers);
        prop_assert_eq!(first.error, second.error);
    }

    #[test]
    fn echoed_replies_are_never_stale(cmd in "[A-Z]{2}", payload in proptest::collection::vec(-1000.0f64..1000.0, 0..4)) {
        let numbers: Vec<String> = payload.iter().map(|n| format!("{:.4}", n)).collect();
        let reply = format!("{} {}", cmd, numbers.join(" "));
        let parsed = classify(&reply, &cmd, false);
        prop_assert_ne!(parsed.kind, ResponseKind::Stale);
    }

    #[test]
    fn answered_replies_carry_every_number(cmd in "[A-Z]{2}", payload in proptest::collection::vec(-1000.0f64..1000.0, 1..5)) {
        let numbers: Vec<String> = payload.iter().map(|n| format!("{:.4}", n)).collect();
        let reply = format!("{} {}", cmd, numbers.join(" "));
        let parsed = classify(&reply, &cmd, false);
        prop_assert_eq!(parsed.kind, ResponseKind::Answered);
        prop_assert_eq!(parsed.numbers.len(), payload.len());
        for (got, want) in parsed.numbers.iter().zip(payload.iter()) {
            prop_assert!((got - want).abs() < 1e-3);
        }
    }

    #[test]
    fn device_rejection_always_surfaces_its_code(cmd in "[A-Z]{2}", code in "[1-9A-GYZ]") {
        // A literal "NO" command would echo-match its own rejection.
        prop_assume!(cmd != "NO");
        let reply = format!("NO {}", code);
        let parsed = classify(&reply, &cmd, false);
        prop_assert_eq!(parsed.kind, ResponseKind::DeviceError);
        prop_assert_eq!(parsed.error.as_deref(), Some(code.as_str()));
    }

    #[test]
    fn unrelated_replies_are_stale(cmd in "[A-M][A-Z]", other in "[N-Z][0-9] [0-9]{1,3}") {
        prop_assume!(other.get(..2) != cmd.get(..2));
        let parsed = classify(&other, &cmd, false);
        prop_assert_eq!(parsed.kind, ResponseKind::Stale);
    }

    #[test]
    fn cross_sweep_count_is_the_sum_of_both_axes(
        az_min in -5.0f64..0.0, az_span in 0.1f64..5.0, az_step in 0.1f64..2.0,
        ze_min in -5.0f64..0.0, ze_span in 0.1f64..5.0, ze_step in 0.1f64..2.0,
    ) {
        let params = sweep_params(
            (az_min, az_min + az_span, az_step),
            (ze_min, ze_min + ze_span, ze_step),
        );
        let az_count = ((az_span / az_step) + 1e-9).floor() as usize + 1;
        let ze_count = ((ze_span / ze_step) + 1e-9).floor() as usize + 1;

        let cross = generate_offsets(&params, SweepPattern::Cross).unwrap();
        prop_assert_eq!(cross.len(), az_count + ze_count);

        let mesh = generate_offsets(&params, SweepPattern::Mesh).unwrap();
        prop_assert_eq!(mesh.len(), az_count * ze_count);
    }

    #[test]
    fn sweep_points_stay_inside_the_configured_range(
        az_min in -5.0f64..0.0, az_span in 0.1f64..5.0, az_step in 0.1f64..2.0,
    ) {
        let params = sweep_params((az_min, az_min + az_span, az_step), (0.0, 0.0, 1.0));
        let offsets = generate_offsets(&params, SweepPattern::Mesh).unwrap();
        prop_assert!(!offsets.is_empty());
        prop_assert!((offsets[0].0 - az_min).abs() < 1e-9);
        for (az, _) in offsets {
            prop_assert!(az >= az_min - 1e-9);
            prop_assert!(az <= az_min + az_span + 1e-9);
        }
    }
}
