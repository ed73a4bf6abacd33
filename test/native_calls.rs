//! Native Call Integration Tests
//!
//! Binds and calls the C fixtures compiled by build.rs. Tests skip when the
//! fixtures could not be built (no C compiler on the host).

use nativecheck::ffi::{
    BindingResolver, BoundFunction, CallState, ErrorKind, FaultRule, FfiError, FunctionSignature,
    Invocation, MarshalLimits, Value,
};
use std::path::PathBuf;

fn arith_lib() -> Option<PathBuf> {
    let path = option_env!("NCK_ARITH_LIB").map(PathBuf::from);
    if path.is_none() {
        eprintln!("arith fixture not built, skipping test");
    }
    path
}

fn strings_lib() -> Option<PathBuf> {
    let path = option_env!("NCK_STRINGS_LIB").map(PathBuf::from);
    if path.is_none() {
        eprintln!("strings fixture not built, skipping test");
    }
    path
}

fn bind(resolver: &BindingResolver, lib: &PathBuf, decl: &str) -> BoundFunction {
    let sig = FunctionSignature::parse(decl).expect("valid declaration");
    resolver.resolve(lib, sig).expect("symbol resolves")
}

// ============================================================================
// Arithmetic
// ============================================================================

#[test]
fn test_addition() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let addition = bind(&resolver, &lib, "int addition(int a, int b)");

    assert_eq!(addition.call(&[Value::Int(5), Value::Int(7)]).unwrap(), Value::Int(12));
    assert_eq!(addition.call(&[Value::Int(-3), Value::Int(10)]).unwrap(), Value::Int(7));

    let samples = [0i64, 1, -1, 42, -1000, 65_536, i32::MAX as i64 / 2, i32::MIN as i64 / 2];
    for &a in &samples {
        for &b in &samples {
            assert_eq!(
                addition.call(&[Value::Int(a), Value::Int(b)]).unwrap(),
                Value::Int(a + b),
                "{} + {}",
                a,
                b
            );
        }
    }
}

#[test]
fn test_addition_rejects_out_of_range_before_calling() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let addition = bind(&resolver, &lib, "int addition(int, int)");

    let err = addition
        .call(&[Value::Int(1), Value::Int(i32::MAX as i64 + 1)])
        .unwrap_err();
    assert_eq!(
        err,
        FfiError::Range {
            index: 1,
            value: i32::MAX as i64 + 1,
            ty: nativecheck::SemanticType::I32
        }
    );

    let err = addition.call(&[Value::Int(1)]).unwrap_err();
    assert_eq!(
        err,
        FfiError::Arity {
            function: "addition".to_string(),
            expected: 2,
            got: 1
        }
    );

    let err = addition.call(&[Value::Int(1), Value::text("2")]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[test]
fn test_somme_tableau() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let somme = bind(&resolver, &lib, "int somme_tableau(const int *values, size_t count)");

    let values = vec![10, 20, 30, 40, 50];
    assert_eq!(
        somme.call(&[Value::Ints(values), Value::Int(5)]).unwrap(),
        Value::Int(150)
    );

    for seq in [vec![7], vec![-5, 5], (1..=100).collect::<Vec<i64>>(), vec![-1; 33]] {
        let expected: i64 = seq.iter().sum();
        let len = seq.len() as i64;
        assert_eq!(
            somme.call(&[Value::Ints(seq), Value::Int(len)]).unwrap(),
            Value::Int(expected)
        );
    }

    // A shorter count sums a prefix
    assert_eq!(
        somme
            .call(&[Value::Ints(vec![1, 2, 3, 4]), Value::Int(2)])
            .unwrap(),
        Value::Int(3)
    );
}

#[test]
fn test_somme_tableau_count_cannot_exceed_sequence() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let somme = bind(&resolver, &lib, "int somme_tableau(const int*, size_t)");

    let err = somme
        .call(&[Value::Ints(vec![1, 2, 3]), Value::Int(4)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn test_diviser_zero_divisor_guard() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let sig = FunctionSignature::parse("int diviser(int, int)")
        .unwrap()
        .with_fault(FaultRule::ZeroDivisor(1));
    let diviser = resolver.resolve(&lib, sig).unwrap();

    assert_eq!(diviser.call(&[Value::Int(10), Value::Int(3)]).unwrap(), Value::Int(3));
    assert_eq!(diviser.call(&[Value::Int(-7), Value::Int(2)]).unwrap(), Value::Int(-3));
    assert_eq!(diviser.call(&[Value::Int(100), Value::Int(-7)]).unwrap(), Value::Int(-14));

    for x in [0i64, 1, -1, 10, i32::MAX as i64, i32::MIN as i64] {
        let err = diviser.call(&[Value::Int(x), Value::Int(0)]).unwrap_err();
        assert_eq!(
            err,
            FfiError::DivisionByZero {
                function: "diviser".to_string()
            }
        );
    }
}

#[test]
fn test_fault_path_state_history() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let diviser = bind(&resolver, &lib, "int diviser(int, int) [zero_divisor:1]");

    let mut invocation = Invocation::new("diviser");
    let err = diviser
        .invoke_tracked(&mut invocation, &mut [Value::Int(10), Value::Int(0)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DivisionByZero);
    assert_eq!(
        invocation.history(),
        &[
            CallState::ArgumentsReceived,
            CallState::Validated,
            CallState::Marshalled,
            CallState::NativeFaultDetected,
            CallState::ResultTranslated,
        ]
    );

    let mut invocation = Invocation::new("diviser");
    diviser
        .invoke_tracked(&mut invocation, &mut [Value::Int(10), Value::Int(2)])
        .unwrap();
    assert_eq!(
        invocation.history(),
        &[
            CallState::ArgumentsReceived,
            CallState::Validated,
            CallState::Marshalled,
            CallState::NativeCallInFlight,
            CallState::Succeeded,
            CallState::ResultTranslated,
        ]
    );
    assert!(invocation.state().is_terminal());
}

#[test]
fn test_refused_arguments_end_in_rejected_state() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let addition = bind(&resolver, &lib, "int addition(int, int)");

    let mut invocation = Invocation::new("addition");
    let err = addition
        .invoke_tracked(&mut invocation, &mut [Value::Int(1)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arity);
    assert_eq!(
        invocation.history(),
        &[CallState::ArgumentsReceived, CallState::Rejected]
    );
    assert!(invocation.state().is_terminal());

    let mut invocation = Invocation::new("addition");
    let err = addition
        .invoke_tracked(&mut invocation, &mut [Value::Int(1), Value::Int(1 << 40)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(
        invocation.history(),
        &[
            CallState::ArgumentsReceived,
            CallState::Validated,
            CallState::Rejected,
        ]
    );
    assert!(invocation.state().is_terminal());
}

#[test]
fn test_diviser_entiers_status_and_out_param() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let diviser = bind(
        &resolver,
        &lib,
        "int diviser_entiers(int a, int b, int *resultat) [status:0]",
    );

    let mut args = [Value::Int(100), Value::Int(7), Value::Int(0)];
    assert_eq!(diviser.invoke(&mut args).unwrap(), Value::Int(0));
    assert_eq!(args[2], Value::Int(14));

    let mut args = [Value::Int(10), Value::Int(0), Value::Int(-1)];
    let err = diviser.invoke(&mut args).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NativeCall);
    assert!(err.to_string().contains("status -1"));
    // The out-parameter is copied back on the fault path too
    assert_eq!(args[2], Value::Int(-1));
}

#[test]
fn test_status_and_guard_combined() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    let diviser = bind(
        &resolver,
        &lib,
        "int diviser_entiers(int, int, int*) [zero_divisor:1, status:0]",
    );

    let err = diviser
        .call(&[Value::Int(10), Value::Int(0), Value::Int(0)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DivisionByZero);
}

// ============================================================================
// Strings
// ============================================================================

#[test]
fn test_longueur_chaine() {
    let Some(lib) = strings_lib() else { return };
    let resolver = BindingResolver::new();
    let longueur = bind(&resolver, &lib, "int longueur_chaine(const char *texte)");

    assert_eq!(
        longueur.call(&[Value::text("Bonjour Python")]).unwrap(),
        Value::Int(14)
    );
    for text in ["", "a", "été", "une phrase un peu plus longue que les autres"] {
        assert_eq!(
            longueur.call(&[Value::text(text)]).unwrap(),
            Value::Int(text.len() as i64)
        );
    }

    let err = longueur
        .call(&[Value::Bytes(b"avant\0apres".to_vec())])
        .unwrap_err();
    assert_eq!(err, FfiError::InteriorNul { index: 0 });
}

#[test]
fn test_mettre_en_majuscules() {
    let Some(lib) = strings_lib() else { return };
    let resolver = BindingResolver::new();
    let upper = bind(&resolver, &lib, "void mettre_en_majuscules(char *texte)");

    let mut args = [Value::text_buffer(&b"hello world"[..])];
    assert_eq!(upper.invoke(&mut args).unwrap(), Value::Void);
    assert_eq!(args[0], Value::buffer(&b"HELLO WORLD"[..], 12));

    // Idempotent: a second pass leaves the buffer unchanged
    let once = args[0].clone();
    upper.invoke(&mut args).unwrap();
    assert_eq!(args[0], once);

    // Spare capacity is preserved across the copy-back
    let mut args = [Value::buffer(&b"abc"[..], 32)];
    upper.invoke(&mut args).unwrap();
    assert_eq!(args[0], Value::buffer(&b"ABC"[..], 32));

    // `call` leaves the caller's values untouched
    let original = [Value::text_buffer(&b"xyz"[..])];
    upper.call(&original).unwrap();
    assert_eq!(original[0], Value::text_buffer(&b"xyz"[..]));
}

#[test]
fn test_full_capacity_buffer_stays_terminated() {
    let Some(lib) = strings_lib() else { return };
    let resolver = BindingResolver::new();
    let upper = bind(&resolver, &lib, "void mettre_en_majuscules(char*)");
    let length = bind(&resolver, &lib, "int longueur_chaine(char*)");

    // No spare byte for a terminator inside the declared capacity
    let mut args = [Value::buffer(&b"hello"[..], 5)];
    assert_eq!(upper.invoke(&mut args).unwrap(), Value::Void);
    assert_eq!(args[0], Value::buffer(&b"HELLO"[..], 5));

    // strlen over the block stops at the end of the capacity
    assert_eq!(length.call(&args).unwrap(), Value::Int(5));

    let err = upper.call(&[Value::buffer(&b"ab\0cd"[..], 8)]).unwrap_err();
    assert_eq!(err, FfiError::InteriorNul { index: 0 });
}

#[test]
fn test_buffer_capacity_errors() {
    let Some(lib) = strings_lib() else { return };
    let resolver = BindingResolver::new().with_limits(MarshalLimits { max_capacity: 64 });
    let upper = bind(&resolver, &lib, "void mettre_en_majuscules(char*)");

    let err = upper
        .call(&[Value::buffer(&b"hello world"[..], 5)])
        .unwrap_err();
    assert_eq!(
        err,
        FfiError::Capacity {
            index: 0,
            required: 11,
            capacity: 5
        }
    );

    let err = upper.call(&[Value::buffer(&b"x"[..], 65)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Capacity);
}

#[test]
fn test_salutation_returns_string() {
    let Some(lib) = strings_lib() else { return };
    let resolver = BindingResolver::new();
    let salutation = bind(&resolver, &lib, "const char *salutation(void)");

    assert_eq!(salutation.call(&[]).unwrap(), Value::text("Bonjour depuis C"));
}

// ============================================================================
// Binding resolution
// ============================================================================

#[test]
fn test_library_loaded_once_per_path() {
    let (Some(arith), Some(strings)) = (arith_lib(), strings_lib()) else {
        return;
    };
    let resolver = BindingResolver::new();

    let first = bind(&resolver, &arith, "int addition(int, int)");
    let second = bind(&resolver, &arith, "int addition(int, int)");
    let other = bind(&resolver, &arith, "int somme_tableau(const int*, size_t)");
    assert!(first.shares_library(&second));
    assert!(first.shares_library(&other));
    assert_eq!(resolver.load_count(), 1);

    let upper = bind(&resolver, &strings, "void mettre_en_majuscules(char*)");
    assert!(!upper.shares_library(&first));
    assert_eq!(resolver.load_count(), 2);
    assert_eq!(resolver.loaded_libraries().len(), 2);
}

#[test]
fn test_relative_path_with_base_dir() {
    let Some(arith) = arith_lib() else { return };
    let dir = arith.parent().unwrap().to_path_buf();
    let file = arith.file_name().unwrap().to_owned();

    let resolver = BindingResolver::new().with_base_dir(&dir);
    let a = bind(&resolver, &PathBuf::from(&file), "int addition(int, int)");
    let b = bind(&resolver, &arith, "int addition(int, int)");
    assert!(a.shares_library(&b));
    assert_eq!(resolver.load_count(), 1);
}

#[test]
fn test_concurrent_resolution_loads_once() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();

    let functions: Vec<BoundFunction> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| bind(&resolver, &lib, "int addition(int, int)")))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(resolver.load_count(), 1);
    for f in &functions[1..] {
        assert!(f.shares_library(&functions[0]));
    }
}

#[test]
fn test_conflicting_redeclaration() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();
    bind(&resolver, &lib, "int diviser(int, int) [zero_divisor:1]");

    let err = resolver
        .resolve(&lib, FunctionSignature::parse("int diviser(int, int)").unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateSignature);

    let declared = resolver.lookup(&lib, "diviser").unwrap();
    assert_eq!(declared.faults, vec![FaultRule::ZeroDivisor(1)]);
}

#[test]
fn test_declare_then_resolve() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();

    let err = resolver.resolve_declared(&lib, "addition").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownSignature);

    resolver
        .declare(&lib, FunctionSignature::parse("int addition(int, int)").unwrap())
        .unwrap();
    let addition = resolver.resolve_declared(&lib, "addition").unwrap();
    assert_eq!(addition.call(&[Value::Int(2), Value::Int(2)]).unwrap(), Value::Int(4));
}

#[test]
fn test_missing_symbol() {
    let Some(lib) = arith_lib() else { return };
    let resolver = BindingResolver::new();

    let err = resolver
        .resolve(&lib, FunctionSignature::parse("int soustraction(int, int)").unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolNotFound);
    assert!(resolver.lookup(&lib, "soustraction").is_err());
}

#[test]
fn test_global_resolver() {
    let Some(lib) = arith_lib() else { return };
    let a = bind(BindingResolver::global(), &lib, "int addition(int, int)");
    let b = bind(BindingResolver::global(), &lib, "int addition(int, int)");
    assert!(a.shares_library(&b));
    assert_eq!(a.library_path(), b.library_path());
}
