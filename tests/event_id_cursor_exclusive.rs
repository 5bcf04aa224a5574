use simplebus::{Bus, BusConfig, Cursor, Inclusivity, Next};

#[test]
fn exclusive_event_id_cursor_skips_matched_record() -> simplebus::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let bus = Bus::open(BusConfig::new(dir.path()))?;

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(bus.publish("t", format!("e{i}").into_bytes(), None)?);
    }

    let mut sub = bus.subscribe("t", Cursor::EventId(ids[2], Inclusivity::Exclusive))?;
    let mut payloads = Vec::new();
    for _ in 0..2 {
        match sub.next()? {
            Next::Event(ev) => payloads.push(ev.payload),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(payloads, vec![b"e3".to_vec(), b"e4".to_vec()]);

    let mut sub_inclusive = bus.subscribe("t", Cursor::EventId(ids[2], Inclusivity::Inclusive))?;
    match sub_inclusive.next()? {
        Next::Event(ev) => assert_eq!(ev.payload, b"e2".to_vec()),
        other => panic!("unexpected {other:?}"),
    }

    let missing = bus.subscribe(
        "t",
        Cursor::EventId(simplebus::EventId::from_bytes([0xFF; 16]), Inclusivity::Inclusive),
    );
    assert!(matches!(missing, Err(simplebus::Error::CursorNotFound)));

    bus.shutdown();
    Ok(())
}
