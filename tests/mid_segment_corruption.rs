use simplebus::{Bus, BusConfig, Error};

#[test]
fn unrecoverable_corruption_in_non_final_segment_aborts_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BusConfig::new(dir.path());
    config.max_segment_bytes = 40;

    {
        let bus = Bus::open(config.clone()).unwrap();
        for i in 0..10 {
            bus.publish("t", format!("payload-{i}").into_bytes(), None)
                .unwrap();
        }
        bus.shutdown();
    }

    let topic_dir = dir.path().join("topics").join("t");
    let segments = simplebus::segment::discover_segments(&topic_dir).unwrap();
    assert!(
        segments.len() >= 2,
        "expected the tiny segment cap to force at least one rotation"
    );

    let first_segment_path = topic_dir.join(format!("log-{:08}.seg", segments[0]));
    let mut bytes = std::fs::read(&first_segment_path).unwrap();
    bytes[13] ^= 0xFF; // flip a byte inside the first record's body
    std::fs::write(&first_segment_path, &bytes).unwrap();

    let err = Bus::open(config).unwrap_err();
    assert!(matches!(
        err,
        Error::UnrecoverableSegment { segment_no, .. } if segment_no == segments[0]
    ));
}
