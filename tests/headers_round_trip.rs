use simplebus::{Bus, BusConfig, Cursor, Next};
use std::collections::BTreeMap;

#[test]
fn headers_round_trip_through_publish_and_replay() -> simplebus::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let bus = Bus::open(BusConfig::new(dir.path()))?;

    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    headers.insert("trace-id".to_string(), "abc123".to_string());

    bus.publish("t", b"{}".to_vec(), Some(headers.clone()))?;

    let mut sub = bus.subscribe("t", Cursor::Beginning)?;
    match sub.next()? {
        Next::Event(ev) => assert_eq!(ev.headers, headers),
        other => panic!("unexpected {other:?}"),
    }

    bus.shutdown();
    Ok(())
}
