/// Loading compiled units from their JSON and postcard encodings.
use pretty_assertions::assert_eq;
use pyrun::{
    Builtins, CodeFlags, CollectStringPrint, CompiledUnit, Constant, Mnemonic, NoLimitTracker, NoopTracer,
    UnitBuilder, VM,
};

fn output_of(unit: &CompiledUnit) -> String {
    let mut print = CollectStringPrint::new();
    VM::new(Builtins::default(), NoLimitTracker, &mut print, NoopTracer)
        .run_code(unit)
        .unwrap();
    print.into_output()
}

/// `def add(a, b=10): return a + b` then `print add(5)`, with a nested code constant.
fn sample_unit() -> CompiledUnit {
    let mut add = UnitBuilder::new("add");
    add.filename("sample.py").args(&["a", "b"]);
    add.local_op(Mnemonic::LoadFast, "a").local_op(Mnemonic::LoadFast, "b");
    add.emit(Mnemonic::BinaryAdd).emit(Mnemonic::ReturnValue);

    let mut b = UnitBuilder::new("<module>");
    b.filename("sample.py");
    b.load_const(10).load_const(add.build()).emit_arg(Mnemonic::MakeFunction, 1);
    b.name_op(Mnemonic::StoreName, "add");
    b.name_op(Mnemonic::LoadName, "add").load_const(5).call(Mnemonic::CallFunction, 1, 0);
    b.emit(Mnemonic::PrintItem).emit(Mnemonic::PrintNewline);
    b.load_const(()).emit(Mnemonic::ReturnValue);
    b.build()
}

/// A unit written to JSON and read back is identical and runs the same way.
#[test]
fn json_round_trip_runs() {
    let unit = sample_unit();
    let json = unit.to_json().unwrap();
    let loaded = CompiledUnit::from_json(&json).unwrap();
    assert_eq!(loaded, unit);
    assert_eq!(output_of(&loaded), "15\n");
}

/// The postcard encoding carries nested code objects too.
#[test]
fn postcard_round_trip_runs() {
    let unit = sample_unit();
    let bytes = unit.to_bytes().unwrap();
    let loaded = CompiledUnit::from_bytes(&bytes).unwrap();
    assert_eq!(loaded, unit);
    assert_eq!(output_of(&loaded), "15\n");
}

/// A hand-written JSON unit; omitted tables default to empty.
#[test]
fn hand_written_json_unit() {
    let json = r#"{
        "name": "<module>",
        "code": [100, 0, 0, 70, 100, 1, 0, 83],
        "consts": [{"Int": 42}, "None"]
    }"#;
    let unit = CompiledUnit::from_json(json).unwrap();
    assert_eq!(unit.filename, "<unit>");
    assert_eq!(unit.flags, CodeFlags::empty());
    assert_eq!(unit.consts, vec![Constant::Int(42), Constant::None]);
    assert_eq!(output_of(&unit), "42\n");
}

/// Truncated or malformed input is rejected with a descriptive error.
#[test]
fn malformed_units_are_rejected() {
    let err = CompiledUnit::from_json("{\"name\": 1}").unwrap_err();
    assert!(err.to_string().starts_with("invalid JSON unit"), "{err}");

    let bytes = sample_unit().to_bytes().unwrap();
    let err = CompiledUnit::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(err.to_string().starts_with("invalid binary unit"), "{err}");
}
