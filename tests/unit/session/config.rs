use super::*;
use crate::foundation::core::{BufferFormat, Dimensions};
use crate::negotiate::requirement::OutputKind;

#[test]
fn empty_object_gives_defaults() {
    let c = EngineConfig::from_json_str("{}").unwrap();
    assert_eq!(c, EngineConfig::default());
    assert_eq!(c.pool.capacity, 8);
    assert_eq!(c.ring.max_external_read_lag, 0);
    assert_eq!(c.limits.max_passes, 4);
}

#[test]
fn partial_sections_keep_other_defaults() {
    let c = EngineConfig::from_json_str(
        r#"{"ring": {"max_external_read_lag": 2, "reference_format": "ubwc"}, "batch_size": 4}"#,
    )
    .unwrap();
    assert_eq!(c.ring.max_external_read_lag, 2);
    assert_eq!(c.ring.reference_format, BufferFormat::Ubwc);
    assert_eq!(c.batch_size, 4);
    assert_eq!(c.limits, DimensionLimits::default());
}

#[test]
fn malformed_json_is_serde_error() {
    let err = EngineConfig::from_json_str("{\"batch_size\": \"two\"}").unwrap_err();
    assert!(matches!(err, FrameJobError::Serde(_)));
}

#[test]
fn oversized_ring_is_config_error() {
    let err = EngineConfig::from_json_str(
        r#"{"ring": {"max_external_read_lag": 6}, "batch_size": 8}"#,
    )
    .unwrap_err();
    assert!(matches!(err, FrameJobError::Config(_)));
}

#[test]
fn batch_size_is_bounded() {
    for bad in [0, 9] {
        let c = EngineConfig {
            batch_size: bad,
            ..EngineConfig::default()
        };
        assert!(matches!(c.validate(), Err(FrameJobError::Config(_))));
    }
}

#[test]
fn stream_config_parses_outputs() {
    let s = StreamConfig::from_json_str(
        r#"{
            "outputs": [
                {"kind": "display",
                 "optimal": {"width": 1920, "height": 1080},
                 "min": {"width": 640, "height": 480},
                 "max": {"width": 4096, "height": 3072}},
                {"kind": "video",
                 "optimal": {"width": 1280, "height": 720},
                 "min": {"width": 640, "height": 480},
                 "max": {"width": 1920, "height": 1080},
                 "stride_alignment": 64}
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(s.engine, EngineConfig::default());
    assert_eq!(s.outputs.len(), 2);
    assert_eq!(s.outputs[1].kind, OutputKind::Video);
    assert_eq!(s.outputs[1].requirement.stride_alignment, 64);
    assert_eq!(s.outputs[0].requirement.optimal, Dimensions::new(1920, 1080));
}
