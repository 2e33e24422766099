use super::*;

#[test]
fn defaults_match_reference_revision() {
    let l = DimensionLimits::default();
    l.validate().unwrap();
    assert_eq!(l.min_pass, Dimensions::new(30, 26));
    assert_eq!(l.max_passes, 4);
    assert_eq!(l.video.max_downscale, 16.0);
    assert_eq!(l.compression.ratio(BufferFormat::Ubwc), 1.6);
}

#[test]
fn reference_output_never_scales() {
    let l = DimensionLimits::default();
    assert_eq!(l.scale_limits(OutputKind::Reference), ScaleLimits::NONE);
    assert_eq!(l.scale_limits(OutputKind::Display), l.display);
}

#[test]
fn standard_ratio_matches_within_tolerance() {
    let l = DimensionLimits::default();
    assert!(l.is_standard_ratio(1920.0 / 1080.0));
    assert!(l.is_standard_ratio(640.0 / 480.0));
    assert!(!l.is_standard_ratio(1.6));
}

#[test]
fn validate_rejects_inconsistent_limits() {
    let mut l = DimensionLimits::default();
    l.max_passes = 5;
    assert!(matches!(l.validate(), Err(FrameJobError::Config(_))));

    let mut l = DimensionLimits::default();
    l.min_input = Dimensions::new(9000, 26);
    assert!(matches!(l.validate(), Err(FrameJobError::Config(_))));

    let mut l = DimensionLimits::default();
    l.alignment = 3;
    assert!(matches!(l.validate(), Err(FrameJobError::Config(_))));

    let mut l = DimensionLimits::default();
    l.video.max_downscale = 0.5;
    assert!(matches!(l.validate(), Err(FrameJobError::Config(_))));
}

#[test]
fn partial_json_fills_defaults() {
    let l: DimensionLimits = serde_json::from_str(r#"{ "max_passes": 2 }"#).unwrap();
    assert_eq!(l.max_passes, 2);
    assert_eq!(l.downscale_factor, 4);
    assert_eq!(l.standard_aspect_ratios.len(), 5);
}
