use fault::{
    Environment, EvalError, NativeFunction, SynthesisOptions, TypeDescriptor, TypeTable, Value,
    VariantSet, parse_definition, resolve_types, synthesize,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn options(num_tests: usize, seed: u64) -> SynthesisOptions {
    SynthesisOptions {
        num_tests,
        seed: Some(seed),
        ..Default::default()
    }
}

proptest! {
    #[test]
    fn prop_samples_fit_width(width in 1usize..96, num_tests in 1usize..32, seed in any::<u64>()) {
        let mut table = TypeTable::new();
        table.insert("a", TypeDescriptor::Random { width });
        let synthesis = synthesize(&table, &options(num_tests, seed), &mut Environment::new()).unwrap();

        let VariantSet::Random(samples) = &synthesis.variants[0].1 else {
            panic!("expected random samples");
        };
        prop_assert_eq!(samples.len(), num_tests);
        for sample in samples {
            prop_assert_eq!(sample.width(), width);
            prop_assert!(sample.value().bits() <= width as u64);
        }
    }

    #[test]
    fn prop_one_marker_per_parameter(widths in prop::collection::vec(1usize..16, 0..5)) {
        let mut table = TypeTable::new();
        for (i, width) in widths.iter().enumerate() {
            table.insert(format!("p{i}"), TypeDescriptor::Random { width: *width });
        }
        let synthesis = synthesize(&table, &options(2, 0), &mut Environment::new()).unwrap();
        prop_assert_eq!(synthesis.markers.len(), widths.len());
        for (i, marker) in synthesis.markers.iter().enumerate() {
            prop_assert_eq!(&marker.param, &format!("p{i}"));
            prop_assert_eq!(marker.values.len(), 2);
        }
        prop_assert!(synthesis.binding.is_none());
    }
}

#[test]
fn test_different_seeds_differ() {
    let mut table = TypeTable::new();
    table.insert("a", TypeDescriptor::Random { width: 64 });
    let first = synthesize(&table, &options(8, 1), &mut Environment::new()).unwrap();
    let second = synthesize(&table, &options(8, 2), &mut Environment::new()).unwrap();
    assert_ne!(first.markers, second.markers);
}

#[test]
fn test_resolved_annotations_feed_synthesis() {
    let mut env = Environment::with_prelude();
    env.define_global("WIDTH", Value::from(6));
    let def = parse_definition("fn t(a: Random(WIDTH), b: Random(WIDTH + 2)) {}").unwrap();
    let table = resolve_types(&def, &env).unwrap();
    assert_eq!(table.get("a"), Some(&TypeDescriptor::Random { width: 6 }));
    assert_eq!(table.get("b"), Some(&TypeDescriptor::Random { width: 8 }));

    let synthesis = synthesize(&table, &options(4, 3), &mut env).unwrap();
    let widths: Vec<usize> = synthesis
        .variants
        .iter()
        .map(|(_, set)| match set {
            VariantSet::Random(samples) => samples[0].width(),
            VariantSet::Bound(_) => 0,
        })
        .collect();
    assert_eq!(widths, [6, 8]);
}

#[test]
fn test_resolution_error_names_parameter() {
    let env = Environment::with_prelude();
    let def = parse_definition("fn t(a: Random(4), b: Random(0)) {}").unwrap();
    let err = resolve_types(&def, &env).unwrap_err();
    assert_eq!(err.param, "b");
    assert_eq!(err.annotation, "Random(0)");
}

#[test]
fn test_oversized_random_width_is_a_resolution_error() {
    let env = Environment::with_prelude();
    let def = parse_definition("fn t(a: Random(18446744073709551615)) {}").unwrap();
    let err = resolve_types(&def, &env).unwrap_err();
    assert_eq!(err.param, "a");
    assert!(matches!(err.source, EvalError::Argument { .. }), "{err}");
}

#[test]
fn test_resolution_is_repeatable() {
    let env = Environment::with_prelude();
    let def = parse_definition("fn t(a: Random(3), b: Random(1 + 2 * 2)) {}").unwrap();
    let first = resolve_types(&def, &env).unwrap();
    let second = resolve_types(&def, &env).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.get("b"), Some(&TypeDescriptor::Random { width: 5 }));
}

#[test]
fn test_annotation_evaluated_once_per_resolution() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut env = Environment::with_prelude();
    env.define_global(
        "bump",
        Value::Function(NativeFunction::new("bump", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from(4))
        })),
    );
    let def = parse_definition("fn t(a: Random(bump())) {}").unwrap();

    let table = resolve_types(&def, &env).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(table.get("a"), Some(&TypeDescriptor::Random { width: 4 }));

    resolve_types(&def, &env).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
