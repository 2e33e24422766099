use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        FrameJobError::invalid_arg("x")
            .to_string()
            .contains("negotiation error (EInvalidArg):")
    );
    assert!(
        FrameJobError::negotiation_failed("x")
            .to_string()
            .contains("negotiation error (EFailed):")
    );
    assert!(
        FrameJobError::invalid_pointer("x")
            .to_string()
            .contains("construction error (EInvalidPointer):")
    );
    assert!(
        FrameJobError::no_memory("x")
            .to_string()
            .contains("construction error (ENoMemory):")
    );
    assert!(
        FrameJobError::invalid_state("x")
            .to_string()
            .contains("invalid state:")
    );
    assert!(
        FrameJobError::serde("x")
            .to_string()
            .contains("serialization error:")
    );
}

#[test]
fn codes_and_classes_follow_variant() {
    let e = FrameJobError::invalid_arg("min > max");
    assert_eq!(e.code(), Some(ResultCode::InvalidArg));
    assert_eq!(e.class(), ErrorClass::Negotiation);

    let e = FrameJobError::no_memory("pool exhausted");
    assert_eq!(e.code(), Some(ResultCode::NoMemory));
    assert_eq!(e.class(), ErrorClass::Construction);

    let e = FrameJobError::config("ring too large");
    assert_eq!(e.code(), None);
    assert_eq!(e.class(), ErrorClass::Config);
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = FrameJobError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
    assert_eq!(err.class(), ErrorClass::Other);
}
