use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeSet;

fn validate_tree<T: Ord + std::fmt::Debug>(t: &LazyTree<T>) {
    let mut stack: Vec<Ptr> = Vec::new();
    if !t.root.is_null() {
        stack.push(t.root);
    }

    let mut reachable = 0usize;
    let mut tombstones = 0usize;
    while let Some(ptr) = stack.pop() {
        let node = t.nodes.get(ptr);
        reachable += 1;
        if node.tombstone {
            tombstones += 1;
        }
        for child in [node.left, node.right] {
            if !child.is_null() {
                stack.push(child);
            }
        }
    }

    assert_eq!(reachable, t.hard_len, "reachable nodes must match hard_len");
    assert_eq!(
        reachable - tombstones,
        t.len,
        "live reachable nodes must match len"
    );

    let occupied = t.nodes.slots.iter().filter(|s| s.is_some()).count();
    assert_eq!(occupied, t.hard_len, "every occupied slot must be linked");
    assert_eq!(
        t.nodes.free.len(),
        t.nodes.slots.len() - occupied,
        "free list must cover exactly the empty slots"
    );

    let values: Vec<&T> = t.iter_hard().map(|(v, _)| v).collect();
    assert!(
        values.windows(2).all(|w| w[0] < w[1]),
        "in-order walk must be strictly ascending: {values:?}"
    );
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 5)]
    Insert(#[proptest(strategy = "0u16..256")] u16),
    #[proptest(weight = 3)]
    Remove(#[proptest(strategy = "0u16..256")] u16),
    #[proptest(weight = 2)]
    Find(#[proptest(strategy = "0u16..256")] u16),
    CollectGarbage,
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(any::<Op>(), 0..=1000)
}

fn apply(t: &mut LazyTree<u16>, op: &Op) {
    match *op {
        Op::Insert(v) => {
            t.insert(v);
        }
        Op::Remove(v) => {
            let _ = t.remove(&v);
        }
        Op::Find(v) => {
            let _ = t.find(&v);
        }
        Op::CollectGarbage => {
            t.collect_garbage();
        }
    }
}

fn hard_snapshot(t: &LazyTree<u16>) -> Vec<(u16, bool)> {
    t.iter_hard().map(|(&v, live)| (v, live)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in ops_strategy()) {
        let mut t: LazyTree<u16> = LazyTree::new();
        let mut m: BTreeSet<u16> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Insert(v) => prop_assert_eq!(t.insert(v), m.insert(v)),
                Op::Remove(v) => prop_assert_eq!(t.remove(&v).is_ok(), m.remove(&v)),
                Op::Find(v) => prop_assert_eq!(t.find(&v).ok(), m.get(&v)),
                Op::CollectGarbage => {
                    let before = t.hard_len();
                    let reclaimed = t.collect_garbage();
                    prop_assert_eq!(before - reclaimed, t.hard_len());
                    prop_assert_eq!(t.hard_len(), m.len());
                }
            }

            prop_assert_eq!(t.len(), m.len());
            prop_assert!(t.hard_len() >= t.len());
        }

        validate_tree(&t);
        prop_assert!(t.iter().eq(m.iter()));
        prop_assert_eq!(t.find_min().ok(), m.first());
        prop_assert_eq!(t.find_max().ok(), m.last());
    }

    #[test]
    fn prop_collect_garbage_keeps_contents(ops in ops_strategy()) {
        let mut t: LazyTree<u16> = LazyTree::new();
        for op in &ops {
            apply(&mut t, op);
        }

        let live: Vec<u16> = t.iter().copied().collect();
        let tombstones = t.hard_len() - t.len();
        prop_assert_eq!(t.collect_garbage(), tombstones);
        validate_tree(&t);
        prop_assert_eq!(t.hard_len(), t.len());

        let after: Vec<u16> = t.iter().copied().collect();
        prop_assert_eq!(&after, &live);
        let physical: Vec<u16> = t.iter_hard().map(|(&v, _)| v).collect();
        prop_assert_eq!(&physical, &live);

        let snapshot = hard_snapshot(&t);
        prop_assert_eq!(t.collect_garbage(), 0);
        prop_assert_eq!(hard_snapshot(&t), snapshot);
    }

    #[test]
    fn prop_clone_tracks_original(prefix in ops_strategy(), suffix in ops_strategy()) {
        let mut t: LazyTree<u16> = LazyTree::new();
        for op in &prefix {
            apply(&mut t, op);
        }

        let mut c = t.clone();
        prop_assert_eq!(c.len(), t.len());
        prop_assert_eq!(c.hard_len(), t.hard_len());
        prop_assert_eq!(hard_snapshot(&c), hard_snapshot(&t));

        for op in &suffix {
            apply(&mut t, op);
            apply(&mut c, op);
        }
        validate_tree(&c);
        prop_assert_eq!(hard_snapshot(&c), hard_snapshot(&t));
        prop_assert_eq!(c.len(), t.len());
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_then_collect() {
    let keys: Vec<u8> = vec![1, 2, 3, 4, 5, 6];

    for_each_permutation(&keys, |perm| {
        let mut t: LazyTree<u8> = LazyTree::new();
        for &k in &perm {
            assert!(t.insert(k));
        }
        validate_tree(&t);

        // Tombstone the first, third and fifth inserted keys: depending on the
        // shape these land on leaves, single-child and two-child nodes.
        for &k in perm.iter().step_by(2) {
            t.remove(&k).unwrap();
        }
        validate_tree(&t);

        assert_eq!(t.collect_garbage(), 3);
        validate_tree(&t);
        let mut expected: Vec<u8> = perm.iter().skip(1).step_by(2).copied().collect();
        expected.sort_unstable();
        assert!(t.iter().copied().eq(expected.iter().copied()));
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys: Vec<u8> = vec![4, 2, 6, 1, 3, 5, 7];

    let base: LazyTree<u8> = keys.iter().copied().collect();
    let base_set: BTreeSet<u8> = keys.iter().copied().collect();

    for_each_permutation(&keys[..6], |perm| {
        let mut t = base.clone();
        let mut m = base_set.clone();

        for (i, k) in perm.into_iter().enumerate() {
            assert_eq!(t.remove(&k).is_ok(), m.remove(&k));
            if i % 2 == 1 {
                t.collect_garbage();
                assert_eq!(t.hard_len(), m.len());
            }
            assert_eq!(t.len(), m.len());
            validate_tree(&t);
            assert!(t.iter().eq(m.iter()));
        }

        t.collect_garbage();
        validate_tree(&t);
        assert_eq!(t.hard_len(), 1);
        assert!(t.iter().copied().eq([7]));
    });
}
