use stiffness::comm::{ProcessGroup, SerialGroup, ThreadGroup};

fn run_on_threads<R: Send>(size: usize, f: impl Fn(ThreadGroup) -> R + Sync) -> Vec<R> {
    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = ThreadGroup::create(size)
            .into_iter()
            .map(|group| scope.spawn(move || f(group)))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    })
}

#[test]
fn serial_group_collectives_are_trivial() {
    let group = SerialGroup;
    assert_eq!(group.rank(), 0);
    assert_eq!(group.size(), 1);
    assert!(group.any(true));
    assert!(!group.any(false));
    assert_eq!(group.exchange(vec![vec![1, 2, 3]]), vec![vec![1, 2, 3]]);
}

#[test]
fn thread_group_exchange_delivers_to_every_member() {
    let received = run_on_threads(3, |group| {
        let outgoing = (0..group.size())
            .map(|to| vec![10 * group.rank() + to])
            .collect();
        group.exchange(outgoing)
    });

    for (rank, incoming) in received.iter().enumerate() {
        let expected: Vec<Vec<usize>> = (0..3).map(|from| vec![10 * from + rank]).collect();
        assert_eq!(incoming, &expected);
    }
}

#[test]
fn thread_group_any_reduces_over_members() {
    let results = run_on_threads(4, |group| {
        let first = group.any(group.rank() == 2);
        let second = group.any(false);
        (first, second)
    });
    assert!(results.iter().all(|&(first, second)| first && !second));
}

#[test]
fn thread_group_supports_repeated_exchanges_of_different_types() {
    let results = run_on_threads(2, |group| {
        let numbers = group.exchange(vec![vec![group.rank()]; 2]);
        let strings = group.exchange(vec![vec![format!("from {}", group.rank())]; 2]);
        (numbers, strings)
    });
    for (numbers, strings) in results {
        assert_eq!(numbers, vec![vec![0], vec![1]]);
        assert_eq!(strings, vec![vec!["from 0".to_string()], vec!["from 1".to_string()]]);
    }
}
