//! Offloads running side by side.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use vecmath_offload::config::{MachineConfig, OffloadConfig};
use vecmath_offload::coproc::{Machine, Runtime};
use vecmath_offload::error::OffloadError;
use vecmath_offload::simd::reduce_values;
use vecmath_offload::Orchestrator;

fn inputs(count: usize) -> Vec<[f32; 4]> {
    let mut rng = StdRng::seed_from_u64(12345);
    (0..count)
        .map(|_| std::array::from_fn(|_| rng.random_range(-50.0..=50.0)))
        .collect()
}

#[test]
fn test_parallel_machines_match_host_reduction() {
    let inputs = inputs(32);
    let results: Vec<_> = inputs
        .par_iter()
        .map(|&input| {
            let machine = Machine::new(MachineConfig::default()).unwrap();
            Orchestrator::new(machine, OffloadConfig::default())
                .run(input)
                .unwrap()
                .result
                .unwrap()
        })
        .collect();

    for (input, result) in inputs.iter().zip(&results) {
        let expected = reduce_values(*input);
        assert_eq!(result.input, *input);
        assert_eq!(result.output, expected.squares);
        assert_eq!(result.dot_product, expected.dot_product);
        assert_eq!(result.magnitude, expected.magnitude);
    }
}

#[test]
fn test_shared_machine_admits_one_runtime_at_a_time() {
    let machine = Machine::new(MachineConfig::default()).unwrap();
    let held = Runtime::initialize(&machine, 1, 0).unwrap();

    let errors: Vec<OffloadError> = (0..8)
        .into_par_iter()
        .map(|_| {
            Orchestrator::new(Arc::clone(&machine), OffloadConfig::default())
                .run([1.0; 4])
                .unwrap_err()
        })
        .collect();
    assert!(errors.iter().all(|e| e.root() == &OffloadError::AlreadyInitialized));
    assert_eq!(machine.storage().allocated_bytes(), 0);

    drop(held);
    let result = Orchestrator::new(Arc::clone(&machine), OffloadConfig::default())
        .run([1.0; 4])
        .unwrap()
        .result
        .unwrap();
    assert_eq!(result.dot_product, 4.0);
}

#[test]
fn test_contending_offloads_never_corrupt_results() {
    // runs that lose the race fail cleanly; runs that win are exact
    let machine = Machine::new(MachineConfig::default()).unwrap();
    let inputs = inputs(24);
    let outcomes: Vec<_> = inputs
        .par_iter()
        .map(|&input| {
            let outcome = Orchestrator::new(Arc::clone(&machine), OffloadConfig::default()).run(input);
            (input, outcome)
        })
        .collect();

    let mut completed = 0;
    for (input, outcome) in outcomes {
        match outcome {
            Ok(completion) => {
                let result = completion.result.unwrap();
                assert_eq!(result.input, input);
                assert_eq!(result.output, input.map(|x| x * x));
                completed += 1;
            }
            Err(e) => assert_eq!(e.root(), &OffloadError::AlreadyInitialized),
        }
    }
    println!("{completed} of 24 contending offloads completed");
    assert!(completed >= 1);
    assert!(!machine.is_initialized());
    assert_eq!(machine.storage().allocated_bytes(), 0);
}
