mod common;

use bytecov::coverage::modification::{ClassKey, ClassModification, ClassSource, ModificationCache};
use bytecov::coverage::{CoverageConfig, CoverageData};
use bytecov::jvm::opcodes::*;
use bytecov::jvm::{ClassPath, ClassPathHierarchy, ClassReader};
use common::verifier;
use common::*;
use std::fs;
use std::io::Write;
use std::sync::Arc;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn modification() -> ClassModification {
    ClassModification::new(
        CoverageConfig::default(),
        Arc::new(ModificationCache::new()),
        Arc::new(CoverageData::new()),
    )
}

/// `pkg.Widget`, as a Java 5 compiler would lay it out:
///
/// ```java
/// public class Widget {                                      // line 3
///     private int count;
///     static long total;
///     final int LIMIT = 10;
///
///     int check(int x) { if (x != 0) return 1;               // line 10
///                        return 0; }                         // line 11
///     void bump() { count = count + 1;                       // line 20
///                   total += 1; }                            // line 21
///     void assertPositive(int x) { assert x > 0;             // line 30
///     }                                                      // line 31
///     int pick(String s) { switch (s) { case "a": ... } }    // lines 40, 41
/// }
/// ```
fn widget_class(major_version: u16) -> Vec<u8> {
    let mut class = ClassAssembler::new("pkg/Widget", "java/lang/Object", 0x21, major_version);
    class.field(0x02, "count", "I");
    class.field(0x08, "total", "J");
    class.field(0x10, "LIMIT", "I");

    let object_init = class.method_ref("java/lang/Object", "<init>", "()V");
    let mut init = vec![ALOAD_0, INVOKESPECIAL];
    init.extend_from_slice(&u2(object_init));
    init.push(RETURN);
    class.method(
        0x01,
        "<init>",
        "()V",
        Some(Code { max_stack: 1, max_locals: 1, code: init, lines: vec![(0, 3)] }),
        &[],
    );

    class.method(
        0x00,
        "check",
        "(I)I",
        Some(Code {
            max_stack: 1,
            max_locals: 2,
            code: vec![ILOAD_1, IFEQ, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN],
            lines: vec![(0, 10), (6, 11)],
        }),
        &[],
    );

    let count = class.field_ref("pkg/Widget", "count", "I");
    let total = class.field_ref("pkg/Widget", "total", "J");
    let mut bump = vec![ALOAD_0, ALOAD_0, GETFIELD];
    bump.extend_from_slice(&u2(count));
    bump.extend_from_slice(&[ICONST_1, IADD, PUTFIELD]);
    bump.extend_from_slice(&u2(count));
    bump.push(GETSTATIC);
    bump.extend_from_slice(&u2(total));
    bump.extend_from_slice(&[LCONST_1, LADD, PUTSTATIC]);
    bump.extend_from_slice(&u2(total));
    bump.push(RETURN);
    class.method(
        0x00,
        "bump",
        "()V",
        Some(Code { max_stack: 4, max_locals: 1, code: bump, lines: vec![(0, 20), (10, 21)] }),
        &[],
    );

    let assertions_disabled = class.field_ref("pkg/Widget", "$assertionsDisabled", "Z");
    let assertion_error = class.class("java/lang/AssertionError");
    let assertion_error_init = class.method_ref("java/lang/AssertionError", "<init>", "()V");
    let mut assert_positive = vec![GETSTATIC];
    assert_positive.extend_from_slice(&u2(assertions_disabled));
    assert_positive.extend_from_slice(&[IFNE, 0, 15, ILOAD_1, IFGT, 0, 11, NEW]);
    assert_positive.extend_from_slice(&u2(assertion_error));
    assert_positive.extend_from_slice(&[DUP, INVOKESPECIAL]);
    assert_positive.extend_from_slice(&u2(assertion_error_init));
    assert_positive.extend_from_slice(&[ATHROW, RETURN]);
    class.method(
        0x00,
        "assertPositive",
        "(I)V",
        Some(Code {
            max_stack: 2,
            max_locals: 2,
            code: assert_positive,
            lines: vec![(0, 30), (18, 31)],
        }),
        &[],
    );

    let hash_code = class.method_ref("java/lang/String", "hashCode", "()I");
    let mut pick = vec![ALOAD_1, INVOKEVIRTUAL];
    pick.extend_from_slice(&u2(hash_code));
    pick.extend_from_slice(&[LOOKUPSWITCH, 0, 0, 0]);
    pick.extend_from_slice(&26i32.to_be_bytes());
    pick.extend_from_slice(&1i32.to_be_bytes());
    pick.extend_from_slice(&97i32.to_be_bytes());
    pick.extend_from_slice(&20i32.to_be_bytes());
    pick.extend_from_slice(&[ALOAD_1, IFNULL, 0, 5, ICONST_1, IRETURN, ICONST_0, IRETURN]);
    class.method(
        0x00,
        "pick",
        "(Ljava/lang/String;)I",
        Some(Code { max_stack: 1, max_locals: 2, code: pick, lines: vec![(0, 40), (30, 41)] }),
        &[],
    );

    class.source_file("Widget.java");
    class.finish()
}

fn max_stack_of(class_bytes: &[u8], method_name: &str) -> u16 {
    let reader = ClassReader::new(class_bytes.to_vec()).unwrap();
    let method = reader
        .methods
        .iter()
        .find(|method| &*method.header.name == method_name)
        .unwrap();
    let offset = method.code.unwrap();
    let bytes = reader.bytes((offset, offset + 2)).unwrap();
    u16::from_be_bytes([bytes[0], bytes[1]])
}

#[test]
fn widget_is_instrumented() {
    let modification = modification();
    let source = ClassSource::new("/work/classes", 7);
    let original = widget_class(49);
    let modified = modification
        .modify_class("pkg.Widget", &source, &original)
        .unwrap();
    assert_ne!(&*modified, &original[..]);

    let reader = ClassReader::new(modified.to_vec()).unwrap();
    assert_eq!(&*reader.this_class, "pkg/Widget");
    assert_eq!(reader.methods.len(), 5);
    assert_eq!(reader.source_file.as_deref(), Some("Widget.java"));
    assert!(contains(&modified, b"mockit/coverage/TestRun"));
    assert!(contains(&modified, b"lineExecuted"));
    assert!(contains(&modified, b"branchExecuted"));

    let data = modification.coverage_data();
    let file = data.file_data("pkg/Widget.java").unwrap();
    assert_eq!(file.kind_of_top_level_type().as_deref(), Some("cls"));

    let lines = &file.line_coverage;
    assert_eq!(lines.executable_line_count(), 9);
    assert_eq!(lines.number_of_branching_sources_and_targets(10), 2);
    assert_eq!(
        lines.with_line_data(3, |line| line.segment.is_unreachable()),
        Some(true)
    );
}

#[test]
fn compiler_artifacts_are_not_branches() {
    let modification = modification();
    let source = ClassSource::new("/work/classes", 0);
    modification
        .modify_class("pkg.Widget", &source, &widget_class(49))
        .unwrap();

    let file = modification
        .coverage_data()
        .file_data("pkg/Widget.java")
        .unwrap();
    assert_eq!(file.line_coverage.number_of_branching_sources_and_targets(30), 0);
    assert_eq!(file.line_coverage.number_of_branching_sources_and_targets(40), 0);
}

#[test]
fn field_probes_keep_the_stack_balanced() {
    let modification = modification();
    let source = ClassSource::new("/work/classes", 0);
    let modified = modification
        .modify_class("pkg.Widget", &source, &widget_class(49))
        .unwrap();

    let file = modification
        .coverage_data()
        .file_data("pkg/Widget.java")
        .unwrap();
    let fields = file.data_coverage.all_fields();
    assert!(fields.contains(&"Widget.count".to_owned()));
    assert!(fields.contains(&"Widget.total".to_owned()));
    assert!(!fields.contains(&"Widget.LIMIT".to_owned()));

    assert!(contains(&modified, b"fieldRead"));
    assert!(contains(&modified, b"fieldAssigned"));
    assert!(contains(&modified, b"(Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;)V"));
    assert!(contains(&modified, b"Widget.count"));
    assert!(contains(&modified, b"Widget.total"));

    // Deepest point is the read of `count`: this, count, this, file, field
    assert_eq!(max_stack_of(&modified, "bump"), 5);
}

#[test]
fn instrumenting_again_returns_the_same_bytes() {
    let modification = modification();
    let source = ClassSource::new("/work/classes", 0);
    let first = modification
        .modify_class("pkg.Widget", &source, &widget_class(49))
        .unwrap();
    let second = modification
        .modify_class("pkg.Widget", &source, &widget_class(49))
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(modification.cache().modified_count(), 1);
    assert!(modification
        .cache()
        .is_modified(&ClassKey::new("pkg.Widget", 0)));

    // Same class in another loader is a different class
    let other = modification
        .modify_class("pkg.Widget", &ClassSource::new("/work/classes", 1), &widget_class(49))
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(modification.coverage_data().files().len(), 1);
}

#[test]
fn frames_are_computed_for_java_7_classes() {
    let modification = modification();
    let source = ClassSource::new("/work/classes", 0);
    let modified = modification
        .modify_class("pkg.Widget", &source, &widget_class(51))
        .unwrap();
    assert!(contains(&modified, b"StackMapTable"));
    let reader = ClassReader::new(modified.to_vec()).unwrap();
    assert_eq!(reader.version.major_version, 51);
}

#[test]
fn ineligible_classes_are_left_alone() {
    let modification = modification();
    let source = ClassSource::new("/work/classes", 0);

    let mut synthetic = ClassAssembler::new("pkg/Gen", "java/lang/Object", 0x1021, 49);
    synthetic.source_file("Gen.java");
    assert_eq!(modification.modify_class("pkg.Gen", &source, &synthetic.finish()), None);

    let mut annotation = ClassAssembler::new("pkg/Marker", "java/lang/Object", 0x2601, 49);
    annotation.source_file("Marker.java");
    assert_eq!(modification.modify_class("pkg.Marker", &source, &annotation.finish()), None);

    let mut no_java_source = ClassAssembler::new("pkg/Script", "java/lang/Object", 0x21, 49);
    no_java_source.source_file("Script.groovy");
    assert_eq!(modification.modify_class("pkg.Script", &source, &no_java_source.finish()), None);

    let mut test_methods = ClassAssembler::new("pkg/Checks", "java/lang/Object", 0x21, 49);
    test_methods.method(
        0x01,
        "checksSomething",
        "()V",
        Some(Code { max_stack: 0, max_locals: 1, code: vec![RETURN], lines: vec![(0, 5)] }),
        &["Lorg/junit/Test;"],
    );
    test_methods.source_file("Checks.java");
    assert_eq!(modification.modify_class("pkg.Checks", &source, &test_methods.finish()), None);

    assert_eq!(modification.cache().modified_count(), 0);
}

const LLOAD_1: u8 = 0x1F;
const LLOAD_2: u8 = 0x20;

/// `pkg.Account`, reading and writing fields of both widths:
///
/// ```java
/// public class Account {
///     private int balance;
///     private long cents;
///     static int opened;
///     static long total;
///
///     int readBalance() { return balance; }                   // line 10
///     long readCents() { return cents; }                      // line 11
///     void writeBalance(int b) { balance = b; }               // line 12
///     void writeCents(long c) { cents = c; }                  // line 13
///     long readStatics() { return opened + total; }           // line 14
///     void writeStatics(int o, long t) { opened = o; total = t; } // line 15
/// }
/// ```
fn account_class() -> Vec<u8> {
    let mut class = ClassAssembler::new("pkg/Account", "java/lang/Object", 0x21, 49);
    class.field(0x02, "balance", "I");
    class.field(0x02, "cents", "J");
    class.field(0x08, "opened", "I");
    class.field(0x08, "total", "J");
    let balance = class.field_ref("pkg/Account", "balance", "I");
    let cents = class.field_ref("pkg/Account", "cents", "J");
    let opened = class.field_ref("pkg/Account", "opened", "I");
    let total = class.field_ref("pkg/Account", "total", "J");

    let mut method = |name: &str, descriptor: &str, max: (u16, u16), code: Vec<u8>, line: u16| {
        let code = Code { max_stack: max.0, max_locals: max.1, code, lines: vec![(0, line)] };
        class.method(0x00, name, descriptor, Some(code), &[]);
    };
    let with_index = |prefix: &[u8], index: u16, suffix: &[u8]| {
        let mut code = prefix.to_vec();
        code.extend_from_slice(&u2(index));
        code.extend_from_slice(suffix);
        code
    };

    method("readBalance", "()I", (1, 1), with_index(&[ALOAD_0, GETFIELD], balance, &[IRETURN]), 10);
    method("readCents", "()J", (2, 1), with_index(&[ALOAD_0, GETFIELD], cents, &[LRETURN]), 11);
    method(
        "writeBalance",
        "(I)V",
        (2, 2),
        with_index(&[ALOAD_0, ILOAD_1, PUTFIELD], balance, &[RETURN]),
        12,
    );
    method(
        "writeCents",
        "(J)V",
        (3, 3),
        with_index(&[ALOAD_0, LLOAD_1, PUTFIELD], cents, &[RETURN]),
        13,
    );
    let mut read_statics = with_index(&[GETSTATIC], opened, &[I2L, GETSTATIC]);
    read_statics.extend_from_slice(&u2(total));
    read_statics.extend_from_slice(&[LADD, LRETURN]);
    method("readStatics", "()J", (4, 1), read_statics, 14);
    let mut write_statics = with_index(&[ILOAD_1, PUTSTATIC], opened, &[LLOAD_2, PUTSTATIC]);
    write_statics.extend_from_slice(&u2(total));
    write_statics.push(RETURN);
    method("writeStatics", "(IJ)V", (2, 4), write_statics, 15);

    class.source_file("Account.java");
    class.finish()
}

#[test]
fn field_probes_type_check_for_both_field_widths() {
    let original = account_class();
    assert_eq!(verifier::check_class(&original).len(), 6);

    let modification = modification();
    let source = ClassSource::new("/work/classes", 0);
    let modified = modification
        .modify_class("pkg.Account", &source, &original)
        .unwrap();

    let field_hooks: Vec<(String, Vec<String>)> = verifier::check_class(&modified)
        .into_iter()
        .map(|(method, calls)| {
            let hooks = calls
                .into_iter()
                .filter_map(|call| call.strip_prefix("mockit/coverage/TestRun.").map(str::to_owned))
                .filter(|hook| hook.starts_with("field"))
                .collect();
            (method, hooks)
        })
        .collect();
    let read = || "fieldRead".to_owned();
    let assigned = || "fieldAssigned".to_owned();
    assert_eq!(
        field_hooks,
        vec![
            ("readBalance".to_owned(), vec![read()]),
            ("readCents".to_owned(), vec![read()]),
            ("writeBalance".to_owned(), vec![assigned()]),
            ("writeCents".to_owned(), vec![assigned()]),
            ("readStatics".to_owned(), vec![read(), read()]),
            ("writeStatics".to_owned(), vec![assigned(), assigned()]),
        ]
    );

    // ..., this, value(2) is widened to this, this, value(2), with a copy of `this` on top
    assert_eq!(max_stack_of(&modified, "writeCents"), 5);
}

/// `pkg.Chooser`, for Java 7, whose branches leave different boxed numbers on the stack:
///
/// ```java
/// public class Chooser {
///     static Number choose(boolean b) { return b ? Integer.valueOf(1) : Long.valueOf(2); } // line 5
/// }
/// ```
fn chooser_class() -> Vec<u8> {
    let mut class = ClassAssembler::new("pkg/Chooser", "java/lang/Object", 0x21, 51);
    let integer = class.method_ref("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;");
    let long = class.method_ref("java/lang/Long", "valueOf", "(J)Ljava/lang/Long;");
    let mut code = vec![ILOAD_0, IFEQ, 0, 10, ICONST_1, INVOKESTATIC];
    code.extend_from_slice(&u2(integer));
    code.extend_from_slice(&[GOTO, 0, 8, ICONST_0 + 2, I2L, INVOKESTATIC]);
    code.extend_from_slice(&u2(long));
    code.push(ARETURN);
    class.method(
        0x08,
        "choose",
        "(Z)Ljava/lang/Number;",
        Some(Code { max_stack: 2, max_locals: 1, code, lines: vec![(0, 5)] }),
        &[],
    );
    class.source_file("Chooser.java");
    class.finish()
}

/// Class files for `java.lang.Number` and two of its subclasses
fn boxed_number_classes() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        (
            "java/lang/Number",
            ClassAssembler::new("java/lang/Number", "java/lang/Object", 0x421, 52).finish(),
        ),
        (
            "java/lang/Integer",
            ClassAssembler::new("java/lang/Integer", "java/lang/Number", 0x31, 52).finish(),
        ),
        (
            "java/lang/Long",
            ClassAssembler::new("java/lang/Long", "java/lang/Number", 0x31, 52).finish(),
        ),
    ]
}

fn empty_hierarchy() -> ClassPathHierarchy {
    ClassPathHierarchy::new(ClassPath::new())
}

#[test]
fn merged_branch_results_use_super_classes_from_jars() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("lang.jar");
    let mut zip = zip::ZipWriter::new(fs::File::create(&jar).unwrap());
    for (name, bytes) in boxed_number_classes() {
        zip.start_file(format!("{}.class", name), zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&bytes).unwrap();
    }
    zip.finish().unwrap();

    let source = ClassSource::new("/work/classes", 0);
    let mut class_path = ClassPath::new();
    class_path.add(&jar);
    let modified = modification()
        .with_hierarchy(ClassPathHierarchy::new(class_path))
        .modify_class("pkg.Chooser", &source, &chooser_class())
        .unwrap();
    assert!(contains(&modified, b"StackMapTable"));
    assert!(contains(&modified, b"\x00\x10java/lang/Number"));

    // Without the super classes, the best frame type is `java/lang/Object`
    let modified = modification()
        .with_hierarchy(empty_hierarchy())
        .modify_class("pkg.Chooser", &source, &chooser_class())
        .unwrap();
    assert!(!contains(&modified, b"\x00\x10java/lang/Number"));
}

#[test]
fn class_directories_being_instrumented_provide_super_classes() {
    let dir = tempfile::tempdir().unwrap();
    for (name, bytes) in boxed_number_classes() {
        let path = dir.path().join(format!("{}.class", name));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    let modification = modification().with_hierarchy(empty_hierarchy());
    let source = ClassSource::new(dir.path(), 0);
    let modified = modification
        .modify_class("pkg.Chooser", &source, &chooser_class())
        .unwrap();
    assert!(contains(&modified, b"\x00\x10java/lang/Number"));
    assert_eq!(modification.hierarchy().class_path_len(), 1);
}

/// `pkg.Ledger`, with a `tally(int)` method of `lines` one-line increments, which may be skipped
/// by an `if (x != 0)` on line 10
fn ledger_class(lines: u16, guarded: bool) -> Vec<u8> {
    let mut class = ClassAssembler::new("pkg/Ledger", "java/lang/Object", 0x21, 49);
    let body_length = 3 * lines;
    let mut code = vec![ILOAD_0];
    if guarded {
        code.push(IFEQ);
        code.extend_from_slice(&u2(3 + body_length));
    } else {
        code.extend_from_slice(&[POP, NOP, NOP]);
    }
    let mut line_table = vec![(0, 10)];
    for i in 0..lines {
        line_table.push((4 + 3 * i, 11 + i));
        code.extend_from_slice(&[IINC, 0, 1]);
    }
    line_table.push((4 + body_length, 11 + lines));
    code.push(RETURN);
    class.method(
        0x08,
        "tally",
        "(I)V",
        Some(Code { max_stack: 1, max_locals: 1, code, lines: line_table }),
        &[],
    );
    class.method(
        0x08,
        "ping",
        "()V",
        Some(Code { max_stack: 0, max_locals: 0, code: vec![RETURN], lines: vec![(0, 5)] }),
        &[],
    );
    class.source_file("Ledger.java");
    class.finish()
}

fn method_bytes(class_bytes: &[u8], method_name: &str) -> Vec<u8> {
    let reader = ClassReader::new(class_bytes.to_vec()).unwrap();
    let method = reader
        .methods
        .iter()
        .find(|method| &*method.header.name == method_name)
        .unwrap();
    reader.bytes(method.range).unwrap().to_vec()
}

#[test]
fn long_methods_get_wide_forward_jumps() {
    // 3500 increments grow past 32 KiB once each gets a line probe
    let original = ledger_class(3500, true);
    let modification = modification();
    let source = ClassSource::new("/work/classes", 0);
    let modified = modification
        .modify_class("pkg.Ledger", &source, &original)
        .unwrap();

    let tally = method_bytes(&modified, "tally");
    assert!(tally.len() > 32768);
    assert!(contains(&tally, &[IFNE, 0, 8, GOTO_W]));

    let file = modification
        .coverage_data()
        .file_data("pkg/Ledger.java")
        .unwrap();
    assert_eq!(file.line_coverage.number_of_branching_sources_and_targets(10), 2);
}

#[test]
fn methods_too_large_to_instrument_are_copied() {
    let original = ledger_class(15000, false);
    let modification = modification();
    let source = ClassSource::new("/work/classes", 0);
    let modified = modification
        .modify_class("pkg.Ledger", &source, &original)
        .unwrap();

    assert_eq!(method_bytes(&modified, "tally"), method_bytes(&original, "tally"));
    assert_ne!(method_bytes(&modified, "ping"), method_bytes(&original, "ping"));
    assert!(contains(&modified, b"lineExecuted"));
}
