use simplebus::{Bus, BusConfig, Cursor, Durability, Error, Next};

#[test]
fn os_buffered_durability_still_persists_across_clean_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BusConfig::new(dir.path());
    config.durability = Durability::OSBuffered;

    {
        let bus = Bus::open(config.clone()).unwrap();
        for i in 0..20 {
            bus.publish("t", format!("e{i}").into_bytes(), None).unwrap();
        }
        bus.shutdown();
    }

    let bus = Bus::open(config).unwrap();
    assert_eq!(bus.topic_names().unwrap(), vec!["t".to_string()]);
    let mut sub = bus.subscribe("t", Cursor::Beginning).unwrap();
    let mut count = 0;
    for _ in 0..20 {
        if let Next::Event(_) = sub.next().unwrap() {
            count += 1;
        }
    }
    assert_eq!(count, 20);
}

#[test]
fn shutdown_is_idempotent_and_rejects_further_publishes() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Bus::open(BusConfig::new(dir.path())).unwrap();
    bus.publish("t", b"one".to_vec(), None).unwrap();
    bus.shutdown();
    bus.shutdown();
    let err = bus.publish("t", b"two".to_vec(), None).unwrap_err();
    assert!(matches!(err, Error::Shutdown));
}
