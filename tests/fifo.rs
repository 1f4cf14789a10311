use diskqueue::{DiskQueue, Error};
use tempfile::tempdir;

#[test]
fn push_pop_in_order() {
    let dir = tempdir().expect("tempdir");
    let queue = DiskQueue::open(dir.path().join("q")).expect("open");

    queue.push(b"alpha").expect("push alpha");
    queue.push(b"beta").expect("push beta");

    assert_eq!(queue.pop().expect("pop"), Some(b"alpha".to_vec()));
    assert_eq!(queue.pop().expect("pop"), Some(b"beta".to_vec()));
    assert_eq!(queue.pop().expect("pop"), None);
}

#[test]
fn empty_payload_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let queue = DiskQueue::open(dir.path().join("q")).expect("open");

    assert!(matches!(queue.push(b""), Err(Error::EmptyPayload)));
    // Nothing was written.
    assert_eq!(queue.pop().expect("pop"), None);
    assert_eq!(queue.record_counts().expect("counts"), (0, 0));
}

#[test]
fn binary_payloads_round_trip() {
    let dir = tempdir().expect("tempdir");
    let queue = DiskQueue::open(dir.path().join("q")).expect("open");

    let payloads: Vec<Vec<u8>> = vec![
        b"plain".to_vec(),
        b"with\nembedded\nnewlines\n".to_vec(),
        vec![0x00, 0x01, 0x02, 0xFE, 0xFF],
        vec![0x0A],
        (0u8..=255).collect(),
    ];
    for payload in &payloads {
        queue.push(payload).expect("push");
    }
    for payload in &payloads {
        assert_eq!(queue.pop().expect("pop").as_deref(), Some(payload.as_slice()));
    }
    assert_eq!(queue.pop().expect("pop"), None);
}

#[test]
fn fifo_over_many_records() {
    let dir = tempdir().expect("tempdir");
    let queue = DiskQueue::open(dir.path().join("q")).expect("open");

    for i in 0..200u32 {
        queue.push(format!("record-{i}").as_bytes()).expect("push");
    }
    for i in 0..200u32 {
        let payload = queue.pop().expect("pop").expect("record");
        assert_eq!(payload, format!("record-{i}").into_bytes());
    }
    assert_eq!(queue.pop().expect("pop"), None);
    assert_eq!(queue.record_counts().expect("counts"), (200, 200));
}

#[test]
fn concurrent_producers_keep_per_producer_order() {
    use std::collections::HashMap;
    use std::sync::Arc;

    let dir = tempdir().expect("tempdir");
    let queue = Arc::new(DiskQueue::open(dir.path().join("q")).expect("open"));

    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 50;

    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        handles.push(std::thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                let payload = format!("{producer}:{seq}");
                queue.push(payload.as_bytes()).expect("push");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("producer thread");
    }

    let mut last_seq: HashMap<usize, usize> = HashMap::new();
    let mut total = 0usize;
    while let Some(payload) = queue.pop().expect("pop") {
        let text = String::from_utf8(payload).expect("utf8");
        let (producer, seq) = text.split_once(':').expect("tag");
        let producer: usize = producer.parse().expect("producer id");
        let seq: usize = seq.parse().expect("sequence");
        if let Some(&previous) = last_seq.get(&producer) {
            assert!(seq > previous, "producer {producer} reordered: {seq} after {previous}");
        }
        last_seq.insert(producer, seq);
        total += 1;
    }
    assert_eq!(total, PRODUCERS * PER_PRODUCER);
}

#[test]
fn operations_after_close_fail() {
    let dir = tempdir().expect("tempdir");
    let queue = DiskQueue::open(dir.path().join("q")).expect("open");

    queue.push(b"x").expect("push");
    queue.close().expect("close");
    queue.close().expect("close is idempotent");

    assert!(matches!(queue.push(b"y"), Err(Error::Closed)));
    assert!(matches!(queue.pop(), Err(Error::Closed)));
}
