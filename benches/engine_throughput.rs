//! Benchmark suite for the balance engine and the processing strategies
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! ```
//!
//! Inputs are generated in code: a number of wallets, each opened with a
//! balance, followed by interleaved credits and debits (some of which
//! overdraw and are rejected).

use rust_decimal::Decimal;
use std::io::Write;
use std::thread;
use tempfile::NamedTempFile;
use wallet_ledger::cli::StrategyType;
use wallet_ledger::strategy::{create_strategy, BatchConfig};
use wallet_ledger::{BalanceEngine, EngineConfig, TransactionRequest};

fn main() {
    divan::main();
}

/// Generate a command file with `wallets` wallets and `per_wallet` transactions each
fn command_file(wallets: usize, per_wallet: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    writeln!(file, "type,wallet,txid,amount").expect("write");
    for w in 0..wallets {
        writeln!(file, "open,w{},,100", w).expect("write");
    }
    for t in 0..per_wallet {
        for w in 0..wallets {
            let amount = if t % 2 == 0 { "-7.5" } else { "3.25" };
            writeln!(file, "tx,w{},T{}-{},{}", w, w, t, amount).expect("write");
        }
    }
    file.flush().expect("flush");
    file
}

#[divan::bench(args = [StrategyType::Sync, StrategyType::Async])]
fn strategy_small(bencher: divan::Bencher, strategy: StrategyType) {
    let input = command_file(10, 10);
    bencher.bench_local(|| {
        let engine = BalanceEngine::in_memory(EngineConfig::default());
        let mut output = Vec::new();
        create_strategy(strategy, Some(BatchConfig::default()))
            .process(&engine, input.path(), &mut output)
            .expect("Processing failed");
    });
}

#[divan::bench(args = [StrategyType::Sync, StrategyType::Async])]
fn strategy_medium(bencher: divan::Bencher, strategy: StrategyType) {
    let input = command_file(100, 100);
    bencher.bench_local(|| {
        let engine = BalanceEngine::in_memory(EngineConfig::default());
        let mut output = Vec::new();
        create_strategy(strategy, Some(BatchConfig::default()))
            .process(&engine, input.path(), &mut output)
            .expect("Processing failed");
    });
}

/// Many threads hammering a single wallet
#[divan::bench(args = [1, 4, 8])]
fn contended_wallet(bencher: divan::Bencher, threads: usize) {
    bencher.bench_local(|| {
        let engine = BalanceEngine::in_memory(EngineConfig::default());
        let wallet = engine
            .create_wallet("hot", Decimal::new(1_000_000, 0))
            .expect("create")
            .id;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let engine = engine.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let request = TransactionRequest::new(
                            wallet,
                            Decimal::NEGATIVE_ONE,
                            format!("{}-{}", t, i),
                        );
                        engine.apply_transaction(request).expect("apply");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
    });
}

#[divan::bench]
fn cached_balance_reads(bencher: divan::Bencher) {
    let engine = BalanceEngine::in_memory(EngineConfig::default());
    let wallet = engine
        .create_wallet("read-heavy", Decimal::new(100, 0))
        .expect("create");

    bencher.bench_local(|| engine.get_balance(wallet.id).expect("balance"));
}
