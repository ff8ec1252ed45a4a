use fault::{
    BackendCall, BackendError, BitVector, Circuit, CircuitRef, Environment, EvalError, FaultError,
    Port, RecordingBackend, Scope, SimulatorBackend, SynthesisError, SynthesisOptions,
    SynthesizedTest, Value, parse_definition, synthesize_source,
};
use itertools::Itertools;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Combinational 4-bit adder with a 5-bit result.
struct AdderModel {
    a: BitVector,
    b: BitVector,
    out: BitVector,
}

impl AdderModel {
    fn new() -> Self {
        Self {
            a: BitVector::zero(4),
            b: BitVector::zero(4),
            out: BitVector::zero(5),
        }
    }
}

impl SimulatorBackend for AdderModel {
    fn evaluate(&mut self) -> Result<(), BackendError> {
        self.out = BitVector::new(self.a.value() + self.b.value(), 5);
        Ok(())
    }

    fn set_value(&mut self, port: &Port, value: &BitVector, _scope: &Scope) -> Result<(), BackendError> {
        match port.name.as_str() {
            "a" => self.a = value.clone(),
            "b" => self.b = value.clone(),
            other => {
                return Err(BackendError::Port {
                    port: other.to_string(),
                    reason: "not writable".into(),
                });
            }
        }
        Ok(())
    }

    fn get_value(&mut self, port: &Port, _scope: &Scope) -> Result<BitVector, BackendError> {
        match port.name.as_str() {
            "a" => Ok(self.a.clone()),
            "b" => Ok(self.b.clone()),
            _ => Ok(self.out.clone()),
        }
    }
}

fn adder_circuit() -> Circuit {
    Circuit::new(
        "Adder",
        vec![Port::input("a", 4), Port::input("b", 4), Port::output("out", 5)],
    )
}

fn adder_env(instances: Arc<AtomicUsize>) -> Environment {
    let mut env = Environment::with_prelude();
    env.define_circuit(CircuitRef::new(
        adder_circuit(),
        move |_: &Circuit| -> Result<Box<dyn SimulatorBackend>, BackendError> {
            instances.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(AdderModel::new()))
        },
    ));
    env
}

fn seeded(num_tests: usize) -> SynthesisOptions {
    SynthesisOptions {
        num_tests,
        seed: Some(11),
        ..Default::default()
    }
}

const ADDER_TEST: &str = r#"
    /// Sums are exact on the 5-bit output.
    fn test_add(a: Random(4), b: Random(4), dut: Adder) {
        dut.a = a;
        dut.b = b;
        dut.eval();
        assert dut.out == int(a) + int(b), "wrong sum";
    }
"#;

#[test]
fn test_adder_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();
    let instances = Arc::new(AtomicUsize::new(0));
    let env = adder_env(instances.clone());
    let test = SynthesizedTest::builder(parse_definition(ADDER_TEST).unwrap())
        .num_tests(3)
        .seed(11)
        .build(&env)
        .unwrap();

    let report = test.run_all();
    assert!(report.is_success(), "{:?}", report.failed);
    assert_eq!(report.total(), 9);
    // One simulation instance shared by every case.
    assert_eq!(instances.load(Ordering::SeqCst), 1);
}

#[test]
fn test_identity_preserved() {
    let env = adder_env(Arc::new(AtomicUsize::new(0)));
    let test = SynthesizedTest::builder(parse_definition(ADDER_TEST).unwrap())
        .options(seeded(2))
        .build(&env)
        .unwrap();

    assert_eq!(test.name(), "test_add");
    assert_eq!(test.doc(), Some("Sums are exact on the 5-bit output."));
    assert_eq!(test.params(), ["a", "b", "dut"]);
    assert_eq!(test.function().name(), "test_add");
    assert_eq!(
        test.environment().lookup("test_add"),
        Some(&Value::Function(test.function().clone()))
    );
}

#[test]
fn test_caller_environment_untouched() {
    let env = adder_env(Arc::new(AtomicUsize::new(0)));
    let before = env.names().into_iter().map(str::to_string).collect_vec();
    let test = SynthesizedTest::builder(parse_definition(ADDER_TEST).unwrap())
        .options(seeded(2))
        .build(&env)
        .unwrap();

    assert!(!env.contains("__sim_Adder"));
    assert!(!env.contains("test_add"));
    assert_eq!(env.names(), before);
    assert!(test.environment().contains("__sim_Adder"));
    assert_eq!(test.adapter().map(|b| b.name.as_str()), Some("__sim_Adder"));
}

#[test]
fn test_markers_cover_every_parameter() {
    let env = adder_env(Arc::new(AtomicUsize::new(0)));
    let test = SynthesizedTest::builder(parse_definition(ADDER_TEST).unwrap())
        .options(seeded(3))
        .build(&env)
        .unwrap();

    let markers = test.markers();
    assert_eq!(markers.iter().map(|m| m.param.as_str()).collect_vec(), ["a", "b", "dut"]);
    assert_eq!(markers[0].values.len(), 3);
    assert_eq!(markers[1].values.len(), 3);
    for value in markers[0].values.iter().chain(&markers[1].values) {
        match value {
            Value::Bits(bits) => {
                assert_eq!(bits.width(), 4);
                assert!(bits.to_u64().is_some_and(|v| v < 16));
            }
            other => panic!("expected a BitVector, found {other:?}"),
        }
    }
    assert!(matches!(markers[2].values.as_slice(), [Value::Circuit(c)] if c.name() == "Adder"));

    let source = test.definition().to_string();
    assert!(source.contains("#[parametrize(\"a\", [BitVector("), "{source}");
    assert!(source.contains("#[parametrize(\"dut\", [Adder])]"), "{source}");
    assert!(source.contains("__sim_Adder.evaluate();"), "{source}");
}

#[test]
fn test_cases_are_full_cross_product() {
    let env = adder_env(Arc::new(AtomicUsize::new(0)));
    let test = SynthesizedTest::builder(parse_definition(ADDER_TEST).unwrap())
        .options(seeded(4))
        .build(&env)
        .unwrap();

    let cases = test.cases();
    assert_eq!(cases.len(), 16);
    assert_eq!(cases[0].id, "test_add[a0-b0-dut0]");
    assert_eq!(cases[1].id, "test_add[a0-b1-dut0]");
    assert_eq!(cases[15].id, "test_add[a3-b3-dut0]");
    assert!(cases.iter().map(|c| &c.id).all_unique());
    assert!(cases.iter().all(|c| c.args.len() == 3));
}

#[test]
fn test_existing_parametrize_markers_replaced() {
    let src = r#"
        #[parametrize("a", [1, 2])]
        #[slow]
        fn t(a: Random(8)) { assert a == a; }
    "#;
    let test = SynthesizedTest::builder(parse_definition(src).unwrap())
        .options(seeded(5))
        .build(&Environment::with_prelude())
        .unwrap();

    assert_eq!(test.markers().len(), 1);
    assert_eq!(test.markers()[0].values.len(), 5);
    let names = test.definition().markers.iter().map(|m| m.name.as_str()).collect_vec();
    assert_eq!(names, ["slow", "parametrize"]);
}

#[test]
fn test_zero_parameters_run_once() {
    let tests = synthesize_source(
        "fn smoke() { assert 1 + 1 == 2; }",
        &Environment::with_prelude(),
        &seeded(8),
    )
    .unwrap();
    let cases = tests[0].cases();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].id, "smoke");
    assert!(tests[0].run_all().is_success());
}

#[test]
fn test_failures_collected() {
    let tests = synthesize_source(
        "fn never(a: Random(2)) { assert a == 5, \"out of range\"; }",
        &Environment::with_prelude(),
        &seeded(4),
    )
    .unwrap();
    let report = tests[0].run_all();
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 4);
    assert!(report.passed.is_empty());
    assert_eq!(report.failed[0].1, EvalError::AssertionFailed("out of range".into()));
}

#[test]
fn test_write_then_read_through_recording_backend() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut env = Environment::with_prelude();
    env.define_circuit(CircuitRef::new(
        Circuit::new("Reg", vec![Port::input("x", 8)]),
        RecordingBackend::factory(log.clone()),
    ));
    let src = "fn t(dut: Reg) { dut.x = 5; dut.eval(); assert dut.x == 5; }";
    let tests = synthesize_source(src, &env, &seeded(1)).unwrap();
    assert!(tests[0].run_all().is_success());

    let calls = log.lock().unwrap().clone();
    assert_eq!(
        calls,
        [
            BackendCall::Set {
                port: "x".into(),
                value: BitVector::new(5u32, 8),
            },
            BackendCall::Evaluate,
            BackendCall::Get {
                port: "x".into(),
                value: BitVector::new(5u32, 8),
            },
        ]
    );
}

#[test]
fn test_out_of_range_write_fails_the_case() {
    let mut env = Environment::with_prelude();
    env.define_circuit(CircuitRef::new(
        Circuit::new("Reg", vec![Port::input("x", 4)]),
        RecordingBackend::factory(Arc::new(Mutex::new(Vec::new()))),
    ));
    let tests = synthesize_source("fn t(dut: Reg) { dut.x = 16; }", &env, &seeded(1)).unwrap();
    let report = tests[0].run_all();
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].1, EvalError::Simulation(_)));
}

#[test]
fn test_multiple_definitions_in_order() {
    let src = "fn first(a: Random(1)) {} fn second() {}";
    let tests = synthesize_source(src, &Environment::with_prelude(), &seeded(2)).unwrap();
    assert_eq!(tests.iter().map(|t| t.name()).collect_vec(), ["first", "second"]);
}

#[test]
fn test_errors_surface_by_stage() {
    let env = adder_env(Arc::new(AtomicUsize::new(0)));
    let options = seeded(1);

    let err = synthesize_source("fn t(a: Missing) {}", &env, &options).unwrap_err();
    assert!(matches!(err, FaultError::Resolution(_)), "{err}");

    let err = synthesize_source("fn t(a: 3) {}", &env, &options).unwrap_err();
    assert!(
        matches!(err, FaultError::Synthesis(SynthesisError::UnsupportedType(_))),
        "{err}"
    );

    let err = synthesize_source("fn t(x: Adder, y: Adder) {}", &env, &options).unwrap_err();
    assert!(
        matches!(err, FaultError::Synthesis(SynthesisError::MultipleSimulationBound { .. })),
        "{err}"
    );

    let err = synthesize_source("fn t(d: Adder) { d.a.b = 1; }", &env, &options).unwrap_err();
    assert!(matches!(err, FaultError::UnsupportedStatement(_)), "{err}");

    let err = synthesize_source("fn t(", &env, &options).unwrap_err();
    assert!(matches!(err, FaultError::Parse(_)), "{err}");

    let err = synthesize_source("fn t(a: Random(4)) {}", &env, &seeded(0)).unwrap_err();
    assert!(matches!(err, FaultError::Synthesis(SynthesisError::NoSamples)), "{err}");
}
