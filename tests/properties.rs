use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tome::{
    build_bipartite, build_kary, build_random, build_random_with_rng, merge_source, merge_wavg,
    MergeMode, MergeOperator, Tensor,
};

fn random_tensor(rng: &mut StdRng, batch: usize, tokens: usize, channels: usize) -> Tensor {
    let data = (0..batch * tokens * channels)
        .map(|_| rng.gen_range(-1.0f32..1.0))
        .collect();
    Tensor::new([batch, tokens, channels], data).expect("valid shape")
}

fn bipartite(op: &MergeOperator) -> &tome::BipartiteMatch {
    match op {
        MergeOperator::Bipartite(m) => m,
        other => panic!("expected bipartite operator, got {other:?}"),
    }
}

fn mean_of_rows(x: &Tensor, b: usize, rows: &[usize]) -> Vec<f32> {
    let mut acc = vec![0.0f32; x.channels()];
    for &t in rows {
        for (a, v) in acc.iter_mut().zip(x.row(b, t)) {
            *a += v;
        }
    }
    acc.iter().map(|v| v / rows.len() as f32).collect()
}

fn assert_rows_close(actual: &[f32], expected: &[f32], context: &str) {
    assert_eq!(actual.len(), expected.len(), "{context}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= 1e-4, "{context}: {actual:?} != {expected:?}");
    }
}

#[test]
fn bipartite_output_has_n_minus_r_tokens() {
    let mut rng = StdRng::seed_from_u64(1);
    for tokens in [4usize, 7, 10] {
        let x = random_tensor(&mut rng, 2, tokens, 5);
        for class_token in [false, true] {
            for distill_token in [false, true] {
                let protected = usize::from(class_token) + usize::from(distill_token);
                for r in 0..=tokens / 2 {
                    let op = build_bipartite(&x, r, class_token, distill_token);
                    let merged = op.merge(&x, MergeMode::Mean).unwrap();
                    let effective = r.min((tokens - protected) / 2);
                    assert_eq!(merged.tokens(), tokens - effective);
                    if r == 0 {
                        assert!(op.is_identity());
                        assert_eq!(merged, x);
                    }
                }
            }
        }
    }
}

#[test]
fn bipartite_round_trip_restores_kept_and_replicates_fused_rows() {
    let mut rng = StdRng::seed_from_u64(2);
    let x = random_tensor(&mut rng, 3, 12, 4);
    for class_token in [false, true] {
        let op = build_bipartite(&x, 5, class_token, false);
        let m = bipartite(&op);
        let merged = op.merge(&x, MergeMode::Mean).unwrap();
        let restored = op.unmerge(&merged).unwrap();
        assert_eq!(restored.shape(), x.shape());

        for b in 0..3 {
            for &i in m.unmerged(b) {
                assert_eq!(restored.row(b, 2 * i), x.row(b, 2 * i));
            }
            for j in 0..6 {
                let mut group = vec![2 * j + 1];
                for (&a, &d) in m.merged(b).iter().zip(m.destinations(b)) {
                    if d == j {
                        group.push(2 * a);
                    }
                }
                let fused = mean_of_rows(&x, b, &group);
                for &t in &group {
                    assert_rows_close(restored.row(b, t), &fused, "fused row");
                }
            }
        }
    }
}

#[test]
fn distill_round_trip_keeps_protected_tokens_in_place() {
    let mut rng = StdRng::seed_from_u64(3);
    let x = random_tensor(&mut rng, 2, 14, 3);
    let op = build_bipartite(&x, 3, true, true);
    let m = bipartite(&op);
    let merged = op.merge(&x, MergeMode::Mean).unwrap();
    assert_eq!(merged.tokens(), 11);
    let restored = op.unmerge(&merged).unwrap();
    assert_eq!(restored.shape(), x.shape());

    for b in 0..2 {
        assert_eq!(merged.row(b, 0), x.row(b, 0));
        assert_eq!(merged.row(b, 1), x.row(b, 1));
        assert_eq!(restored.row(b, 0), x.row(b, 0));
        assert_eq!(restored.row(b, 1), x.row(b, 1));

        let kept = m.unmerged(b);
        assert_eq!(kept.len(), 4);
        for (i, &a) in kept.iter().enumerate().skip(1) {
            assert_eq!(merged.row(b, i + 1), x.row(b, 2 * a));
        }
        for &a in kept {
            assert_eq!(restored.row(b, 2 * a), x.row(b, 2 * a));
        }

        for j in 0..7 {
            let mut group = vec![2 * j + 1];
            for (&a, &d) in m.merged(b).iter().zip(m.destinations(b)) {
                if d == j {
                    group.push(2 * a);
                }
            }
            let fused = mean_of_rows(&x, b, &group);
            let slot = if j == 0 { 1 } else { kept.len() + j };
            assert_rows_close(merged.row(b, slot), &fused, "distill merged row");
            for &t in &group {
                assert_rows_close(restored.row(b, t), &fused, "distill fused row");
            }
        }
    }
}

#[test]
fn random_round_trip_holds_for_every_call() {
    let mut rng = StdRng::seed_from_u64(4);
    let x = random_tensor(&mut rng, 2, 9, 3);
    for _ in 0..10 {
        let op = build_random(&x, 4);
        let MergeOperator::Random(m) = &op else {
            panic!("expected random operator");
        };
        let merged = op.merge(&x, MergeMode::Mean).unwrap();
        assert_eq!(merged.tokens(), 5);
        let restored = op.unmerge(&merged).unwrap();
        for b in 0..2 {
            for (slot, &pos) in m.kept(b).iter().enumerate() {
                let mut group = vec![pos];
                for (&a, &d) in m.merged(b).iter().zip(m.destinations(b)) {
                    if d == slot {
                        group.push(a);
                    }
                }
                let fused = mean_of_rows(&x, b, &group);
                for &t in &group {
                    assert_rows_close(restored.row(b, t), &fused, "random fused row");
                }
            }
        }
    }
}

#[test]
fn random_splits_differ_between_calls() {
    let mut rng = StdRng::seed_from_u64(5);
    let x = random_tensor(&mut rng, 1, 64, 4);
    let splits: BTreeSet<Vec<usize>> = (0..8)
        .map(|_| match build_random(&x, 16) {
            MergeOperator::Random(m) => m.merged(0).to_vec(),
            other => panic!("expected random operator, got {other:?}"),
        })
        .collect();
    assert!(splits.len() > 1, "eight draws produced one split");
}

#[test]
fn random_batch_rows_draw_independently() {
    let x = Tensor::ones(4, 32, 2);
    let op = build_random_with_rng(&x, 8, &mut StdRng::seed_from_u64(6));
    let MergeOperator::Random(m) = &op else {
        panic!("expected random operator");
    };
    let distinct: BTreeSet<&[usize]> = (0..4).map(|b| m.merged(b)).collect();
    assert!(distinct.len() > 1);
}

#[test]
fn weighted_average_matches_group_means_across_a_chain() {
    let mut rng = StdRng::seed_from_u64(7);
    let original = random_tensor(&mut rng, 2, 24, 6);
    let mut x = original.clone();
    let mut size = None;
    let mut source = None;
    for r in [6, 5, 4] {
        let op = build_bipartite(&x, r, true, false);
        source = Some(merge_source(&op, &x, source.as_ref()).unwrap());
        let (merged, merged_size) = merge_wavg(&op, &x, size.as_ref()).unwrap();
        x = merged;
        size = Some(merged_size);
    }
    let source = source.unwrap();
    let size = size.unwrap();
    for b in 0..2 {
        for t in 0..x.tokens() {
            let group: Vec<usize> = (0..24).filter(|&o| source.get(b, t, o) > 0.0).collect();
            assert_eq!(size.get(b, t, 0), group.len() as f32);
            let expected = mean_of_rows(&original, b, &group);
            assert_rows_close(x.row(b, t), &expected, "weighted mean");
        }
    }
}

#[test]
fn weighted_average_equals_sum_then_divide() {
    let mut rng = StdRng::seed_from_u64(8);
    let x = random_tensor(&mut rng, 1, 10, 3);
    let op = build_bipartite(&x, 3, false, false);
    let ones = Tensor::ones(1, 10, 1);
    let size = op.merge(&ones, MergeMode::Sum).unwrap();
    let sums = op.merge(&x.mul_rows(&ones).unwrap(), MergeMode::Sum).unwrap();
    let manual = sums.div_rows(&size).unwrap();
    let (wavg, wsize) = merge_wavg(&op, &x, None).unwrap();
    assert_eq!(wsize, size);
    assert!(wavg.approx_eq(&manual, 1e-6));
    assert!(wavg.approx_eq(&op.merge(&x, MergeMode::Mean).unwrap(), 1e-5));
}

#[test]
fn provenance_matches_naive_group_simulation() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut x = random_tensor(&mut rng, 2, 20, 4);
    let mut groups: Vec<Vec<BTreeSet<usize>>> = (0..2)
        .map(|_| (0..20).map(|t| BTreeSet::from([t])).collect())
        .collect();
    let mut source = None;

    for r in [5, 4, 3, 2] {
        let op = build_bipartite(&x, r, false, false);
        source = Some(merge_source(&op, &x, source.as_ref()).unwrap());
        let m = bipartite(&op);
        for (b, current) in groups.iter_mut().enumerate() {
            let mut dst: Vec<BTreeSet<usize>> =
                (1..current.len()).step_by(2).map(|t| current[t].clone()).collect();
            for (&a, &j) in m.merged(b).iter().zip(m.destinations(b)) {
                let moved = current[2 * a].clone();
                dst[j].extend(moved);
            }
            let mut next: Vec<BTreeSet<usize>> =
                m.unmerged(b).iter().map(|&i| current[2 * i].clone()).collect();
            next.extend(dst);
            *current = next;
        }
        x = op.merge(&x, MergeMode::Mean).unwrap();
    }

    let source = source.unwrap();
    for (b, current) in groups.iter().enumerate() {
        assert_eq!(current.len(), source.tokens());
        for (t, group) in current.iter().enumerate() {
            let tracked: BTreeSet<usize> =
                (0..20).filter(|&o| source.get(b, t, o) == 1.0).collect();
            assert_eq!(&tracked, group);
            assert!(source.row(b, t).iter().all(|&v| v == 0.0 || v == 1.0));
        }
    }
}

#[test]
fn class_token_is_never_removed() {
    let mut rng = StdRng::seed_from_u64(10);
    for _ in 0..20 {
        let x = random_tensor(&mut rng, 2, 11, 3);
        for r in 1..=5 {
            let op = build_bipartite(&x, r, true, false);
            let m = bipartite(&op);
            let merged = op.merge(&x, MergeMode::Mean).unwrap();
            for b in 0..2 {
                assert!(!m.merged(b).contains(&0));
                assert_eq!(m.unmerged(b)[0], 0);
                assert_eq!(merged.row(b, 0), x.row(b, 0));
            }
        }
    }
}

#[test]
fn distill_token_is_never_a_merge_destination() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..20 {
        let x = random_tensor(&mut rng, 2, 12, 3);
        for r in 1..=5 {
            let op = build_bipartite(&x, r, true, true);
            let m = bipartite(&op);
            for b in 0..2 {
                assert!(m.destinations(b).iter().all(|&j| j != 0));
                assert!(!m.merged(b).contains(&0));
            }
        }
    }
}

#[test]
fn kary_truncates_to_whole_groups() {
    let mut rng = StdRng::seed_from_u64(12);
    let exact = random_tensor(&mut rng, 1, 10, 3);
    let op = build_kary(&exact, 5);
    assert_eq!(op.merge(&exact, MergeMode::Mean).unwrap().tokens(), 2);

    let ragged = random_tensor(&mut rng, 1, 12, 3);
    let op = build_kary(&ragged, 5);
    let merged = op.merge(&ragged, MergeMode::Mean).unwrap();
    assert_eq!(merged.tokens(), 2);
    assert_eq!(op.unmerge(&merged).unwrap().tokens(), 10);
}

#[test]
fn kary_with_fewer_tokens_than_a_group_empties_the_sequence() {
    let x = Tensor::ones(2, 3, 2);
    let op = build_kary(&x, 5);
    assert!(!op.is_identity());
    assert_eq!(op.output_tokens(), Some(0));
    let merged = op.merge(&x, MergeMode::Mean).unwrap();
    assert_eq!(merged.shape(), [2, 0, 2]);
    let restored = op.unmerge(&merged).unwrap();
    assert_eq!(restored.shape(), [2, 0, 2]);
}

#[test]
fn paired_tokens_scenario() {
    let metric = Tensor::from_nested(vec![vec![
        vec![1.0, 0.0],
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![0.0, 1.0],
    ]])
    .unwrap();
    let op = build_bipartite(&metric, 1, false, false);
    let m = bipartite(&op);
    assert_eq!(m.merged(0), &[0]);
    assert_eq!(m.destinations(0), &[0]);
    assert_eq!(m.unmerged(0), &[1]);

    let merged = op.merge(&metric, MergeMode::Mean).unwrap();
    assert_eq!(
        merged.to_nested(),
        vec![vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0]]]
    );
}

#[test]
fn mismatched_shapes_surface_as_errors() {
    let x = Tensor::ones(2, 8, 3);
    let op = build_bipartite(&x, 2, false, false);
    assert!(op.merge(&Tensor::ones(1, 8, 3), MergeMode::Sum).is_err());
    assert!(op.unmerge(&Tensor::ones(2, 8, 3)).is_err());
    assert!(op.merge(&Tensor::ones(2, 8, 7), MergeMode::Sum).is_ok());
}
