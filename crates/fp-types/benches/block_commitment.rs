use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fp_types::{verify_fraud_proof, Block, InMemorySmt, SparseMerkleTree, Transaction, ABSENT_VALUE};

fn key(i: u32) -> fp_types::Digest {
    fp_types::Digest::hash_bytes(&i.to_be_bytes())
}

fn fresh_transactions(n: usize) -> Vec<Transaction> {
    (0..n)
        .map(|i| {
            Transaction::new(
                vec![key(i as u32)],
                vec![vec![i as u8; 32]],
                vec![ABSENT_VALUE.to_vec()],
                vec![],
                vec![],
                vec![],
            )
            .unwrap()
        })
        .collect()
}

fn bench_block_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_new");
    for size in [1usize, 16, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || (fresh_transactions(size), InMemorySmt::new()),
                |(txs, mut tree)| Block::new(txs, &mut tree).unwrap(),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_check_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_block");
    for size in [1usize, 16, 256, 1024] {
        let mut producer_tree = InMemorySmt::new();
        let block = Block::new(fresh_transactions(size), &mut producer_tree).unwrap();
        let verifier_tree = InMemorySmt::new();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| block.check_block(&verifier_tree).unwrap());
        });
    }
    group.finish();
}

fn bench_verify_fraud_proof(c: &mut Criterion) {
    let mut producer_tree = InMemorySmt::new();
    let block = Block::new(fresh_transactions(256), &mut producer_tree).unwrap();

    // A verifier whose state tree already diverges from the producer's
    // forces `check_block` down the fraud-proof-generation path, giving us
    // a real `FraudProof` to benchmark `verify_fraud_proof` against.
    let mut divergent_tree = InMemorySmt::new();
    divergent_tree.update(key(u32::MAX), b"unrelated key".to_vec());
    let fraud_proof = block
        .check_block(&divergent_tree)
        .unwrap()
        .expect("divergent starting state yields a fraud proof");
    let header = block.header();

    c.bench_function("verify_fraud_proof", |b| {
        b.iter(|| verify_fraud_proof(&fraud_proof, &header));
    });
}

criterion_group!(benches, bench_block_new, bench_check_block, bench_verify_fraud_proof);
criterion_main!(benches);
