use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use remora_core::mpmc_queue::MpmcQueue;

#[test]
fn test_multi_producer_multi_consumer_keeps_every_value() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const VALUES_PER_PRODUCER: usize = 10_000;

    let queue = Arc::new(MpmcQueue::new());
    let producers_done = Arc::new(AtomicBool::new(false));

    let producer_handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for sequence in 0..VALUES_PER_PRODUCER {
                    assert!(queue.push((producer, sequence)));
                }
            })
        })
        .collect();

    let consumer_handles: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let producers_done = Arc::clone(&producers_done);
            thread::spawn(move || {
                let mut popped = Vec::new();
                loop {
                    match queue.pop() {
                        Some(value) => popped.push(value),
                        None => {
                            if producers_done.load(Ordering::Acquire) && queue.pop().is_none() {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                }
                popped
            })
        })
        .collect();

    for handle in producer_handles {
        handle.join().unwrap();
    }
    producers_done.store(true, Ordering::Release);

    let mut all_popped = Vec::new();
    for handle in consumer_handles {
        all_popped.extend(handle.join().unwrap());
    }

    // Multiset of popped values equals the multiset pushed.
    //
    assert_eq!(all_popped.len(), PRODUCERS * VALUES_PER_PRODUCER);
    let mut seen = vec![[false; VALUES_PER_PRODUCER]; PRODUCERS];
    for (producer, sequence) in &all_popped {
        assert!(!seen[*producer][*sequence], "value popped twice");
        seen[*producer][*sequence] = true;
    }
}

#[test]
fn test_per_producer_order_is_preserved() {
    const PRODUCERS: usize = 3;
    const VALUES_PER_PRODUCER: usize = 20_000;

    let queue = Arc::new(MpmcQueue::new());

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for sequence in 0..VALUES_PER_PRODUCER {
                    queue.push((producer, sequence));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // A single consumer must observe each producer's values in push order.
    //
    let mut last_seen: HashMap<usize, usize> = HashMap::new();
    let mut total = 0;
    while let Some((producer, sequence)) = queue.pop() {
        if let Some(previous) = last_seen.get(&producer) {
            assert!(
                sequence > *previous,
                "producer {producer} reordered: {sequence} after {previous}"
            );
        }
        last_seen.insert(producer, sequence);
        total += 1;
    }
    assert_eq!(total, PRODUCERS * VALUES_PER_PRODUCER);
}

#[test]
fn test_concurrent_pop_while_pushing() {
    const VALUES: usize = 50_000;

    let queue = Arc::new(MpmcQueue::new());

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..VALUES {
                queue.push(i);
            }
        })
    };

    let mut popped = 0;
    let mut last = None;
    while popped < VALUES {
        if let Some(value) = queue.pop() {
            if let Some(previous) = last {
                assert!(value > previous);
            }
            last = Some(value);
            popped += 1;
        } else {
            thread::yield_now();
        }
    }

    producer.join().unwrap();
    assert!(queue.is_empty());
}
