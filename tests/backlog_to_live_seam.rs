use simplebus::{Bus, BusConfig, Cursor, Next};

#[test]
fn backlog_replay_stitches_seamlessly_onto_live_stream() -> simplebus::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let bus = Bus::open(BusConfig::new(dir.path()))?;

    for i in 0..5 {
        bus.publish("t", format!("early-{i}").into_bytes(), None)?;
    }

    // Subscribing takes its end-of-backlog snapshot here, before the
    // second batch is published.
    let mut sub = bus.subscribe("t", Cursor::Beginning)?;

    for i in 0..5 {
        bus.publish("t", format!("late-{i}").into_bytes(), None)?;
    }

    let mut payloads = Vec::new();
    for _ in 0..10 {
        match sub.next()? {
            Next::Event(ev) => payloads.push(String::from_utf8(ev.payload).unwrap()),
            other => panic!("unexpected {other:?}"),
        }
    }

    let expected: Vec<String> = (0..5)
        .map(|i| format!("early-{i}"))
        .chain((0..5).map(|i| format!("late-{i}")))
        .collect();
    assert_eq!(payloads, expected);

    bus.shutdown();
    Ok(())
}
