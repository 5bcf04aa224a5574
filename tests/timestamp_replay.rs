use simplebus::{Bus, BusConfig, Cursor, Next};
use std::thread;
use std::time::Duration;

#[test]
fn replay_from_timestamp_survives_restart() -> simplebus::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BusConfig::new(dir.path());
    config.timestamp_index_stride = 5;

    {
        let bus = Bus::open(config.clone())?;
        for batch in 0..10 {
            for i in 0..5 {
                bus.publish("events", format!("e{batch}-{i}").into_bytes(), None)?;
            }
            thread::sleep(Duration::from_millis(2));
        }
        bus.shutdown();
    }

    let bus = Bus::open(config.clone())?;
    let pivot_ts;
    {
        let mut sub = bus.subscribe("events", Cursor::Beginning)?;
        let mut seen = 0;
        loop {
            match sub.next()? {
                Next::Event(ev) => {
                    seen += 1;
                    if seen == 26 {
                        pivot_ts = ev.ts_nanos;
                        break;
                    }
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    let mut sub = bus.subscribe("events", Cursor::Timestamp(pivot_ts))?;
    let mut count = 0;
    let mut saw_pivot = false;
    for _ in 0..25 {
        match sub.next()? {
            Next::Event(ev) => {
                assert!(ev.ts_nanos >= pivot_ts);
                saw_pivot |= ev.ts_nanos == pivot_ts;
                count += 1;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(saw_pivot);
    assert_eq!(count, 25);

    bus.shutdown();
    Ok(())
}
