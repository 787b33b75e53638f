use std::borrow::Cow;
use std::sync::Arc;

use probe_asm::class_reader::{CodeAttribute, StackMapFrame};
use probe_asm::class_writer::MethodWriter;
use probe_asm::constants::{ACC_PUBLIC, ACC_STATIC, ACC_SUPER};
use probe_asm::frame::FrameType;
use probe_asm::insn::LabelNode;
use probe_asm::opcodes;
use probe_asm::types::JvmType;
use probe_asm::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn class_bytes(name: &str, super_name: &str, build: impl FnOnce(&mut ClassWriter)) -> Vec<u8> {
    let mut cw = ClassWriter::new();
    cw.visit(52, 0, ACC_PUBLIC | ACC_SUPER, name, Some(super_name), &[]);
    build(&mut cw);
    cw.to_bytes().unwrap()
}

fn method(
    cw: &mut ClassWriter,
    access: u16,
    name: &str,
    descriptor: &str,
    body: impl FnOnce(&mut MethodWriter),
) {
    let mut mw = cw.visit_method(access, name, descriptor);
    body(&mut mw);
    mw.finish(cw);
}

fn code_of(bytes: &[u8], name: &str) -> CodeAttribute {
    let reader = ClassReader::new(bytes).unwrap();
    let class = reader.class_file();
    let method = class
        .methods
        .iter()
        .find(|m| class.cp_utf8(m.name_index).unwrap() == name)
        .unwrap();
    method.code(&class.constant_pool).unwrap().unwrap()
}

fn frame_offsets(code: &CodeAttribute) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut previous: Option<usize> = None;
    for frame in code.stack_map_table().unwrap() {
        let delta = match frame {
            StackMapFrame::FullFrame { offset_delta, .. } => offset_delta as usize,
            other => panic!("expected full frames, got {other:?}"),
        };
        let offset = match previous {
            Some(prev) => prev + delta + 1,
            None => delta,
        };
        offsets.push(offset);
        previous = Some(offset);
    }
    offsets
}

/// `demo/C` with `void m()` using two locals, `static void guarded()` with a
/// try/catch around a call, and a constructor.
fn fixture() -> Vec<u8> {
    class_bytes("demo/C", "java/lang/Object", |cw| {
        method(cw, ACC_PUBLIC, "<init>", "()V", |mw| {
            mw.visit_code(1, 1);
            mw.visit_var_insn(opcodes::ALOAD, 0);
            mw.visit_method_insn(
                opcodes::INVOKESPECIAL,
                "java/lang/Object",
                "<init>",
                "()V",
                false,
            );
            mw.visit_insn(opcodes::RETURN);
            mw.visit_maxs(1, 1);
        });
        method(cw, ACC_PUBLIC, "m", "()V", |mw| {
            mw.visit_code(1, 2);
            mw.visit_insn(opcodes::ICONST_1);
            mw.visit_var_insn(opcodes::ISTORE, 1);
            mw.visit_insn(opcodes::RETURN);
            mw.visit_maxs(1, 2);
        });
        method(cw, ACC_PUBLIC | ACC_STATIC, "guarded", "()V", |mw| {
            let start = LabelNode::at(100);
            let end = LabelNode::at(101);
            let handler = LabelNode::at(102);
            let done = LabelNode::at(103);
            mw.visit_code(1, 1);
            mw.visit_try_catch_block(start, end, handler, Some("java/lang/Exception"));
            mw.visit_label(start);
            mw.visit_method_insn(opcodes::INVOKESTATIC, "demo/C", "work", "()V", false);
            mw.visit_label(end);
            mw.visit_jump_insn(opcodes::GOTO, done);
            mw.visit_label(handler);
            mw.visit_frame(&[], &[FrameType::Object("java/lang/Exception".to_string())]);
            mw.visit_var_insn(opcodes::ASTORE, 0);
            mw.visit_label(done);
            mw.visit_frame(&[], &[]);
            mw.visit_insn(opcodes::RETURN);
            mw.visit_maxs(1, 1);
        });
        method(cw, ACC_PUBLIC | ACC_STATIC, "compute", "()I", |mw| {
            mw.visit_code(1, 0);
            mw.visit_insn(opcodes::ICONST_5);
            mw.visit_insn(opcodes::IRETURN);
            mw.visit_maxs(1, 0);
        });
        method(cw, ACC_PUBLIC | ACC_STATIC, "lines", "()V", |mw| {
            let first = LabelNode::at(200);
            let second = LabelNode::at(201);
            mw.visit_code(1, 0);
            mw.visit_label(first);
            mw.visit_line_number(10, first);
            mw.visit_insn(opcodes::ICONST_0);
            mw.visit_insn(opcodes::POP);
            mw.visit_label(second);
            mw.visit_line_number(11, second);
            mw.visit_insn(opcodes::RETURN);
            mw.visit_maxs(1, 0);
        });
        method(cw, ACC_PUBLIC | ACC_STATIC, "sum", "()V", |mw| {
            mw.visit_code(1, 0);
            mw.visit_method_insn(opcodes::INVOKESTATIC, "demo/C", "value", "()I", false);
            mw.visit_insn(opcodes::POP);
            mw.visit_insn(opcodes::RETURN);
            mw.visit_maxs(1, 0);
        });
    })
}

fn u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn utf8(out: &mut Vec<u8>, value: &str) {
    out.push(1);
    u2(out, value.len() as u16);
    out.extend_from_slice(value.as_bytes());
}

/// `demo/Loop` laid out the way javac writes it, with compressed frames:
///
/// ```text
/// static void loop(int n) {
///     while (n > 0) {   // line 3
///         n--;          // line 4
///     }
/// }                     // line 5
/// ```
fn javac_loop_class() -> Vec<u8> {
    let code = [
        opcodes::ILOAD_0,
        opcodes::IFLE,
        0,
        9,
        opcodes::IINC,
        0,
        0xff,
        opcodes::GOTO,
        0xff,
        0xf9,
        opcodes::RETURN,
    ];
    // Two same_frame entries, at 0 and at 10.
    let stack_map = [0u8, 2, 0, 9];
    let mut lines = Vec::new();
    u2(&mut lines, 3);
    for (pc, line) in [(0, 3), (4, 4), (10, 5)] {
        u2(&mut lines, pc);
        u2(&mut lines, line);
    }

    let mut body = Vec::new();
    u2(&mut body, 1);
    u2(&mut body, 1);
    u4(&mut body, code.len() as u32);
    body.extend_from_slice(&code);
    u2(&mut body, 0);
    u2(&mut body, 2);
    u2(&mut body, 8);
    u4(&mut body, stack_map.len() as u32);
    body.extend_from_slice(&stack_map);
    u2(&mut body, 9);
    u4(&mut body, lines.len() as u32);
    body.extend_from_slice(&lines);

    let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE];
    u2(&mut out, 0);
    u2(&mut out, 52);
    u2(&mut out, 10);
    utf8(&mut out, "demo/Loop");
    out.push(7);
    u2(&mut out, 1);
    utf8(&mut out, "java/lang/Object");
    out.push(7);
    u2(&mut out, 3);
    utf8(&mut out, "loop");
    utf8(&mut out, "(I)V");
    utf8(&mut out, "Code");
    utf8(&mut out, "StackMapTable");
    utf8(&mut out, "LineNumberTable");
    u2(&mut out, ACC_PUBLIC | ACC_SUPER);
    u2(&mut out, 2);
    u2(&mut out, 4);
    u2(&mut out, 0);
    u2(&mut out, 0);
    u2(&mut out, 1);
    u2(&mut out, ACC_STATIC);
    u2(&mut out, 5);
    u2(&mut out, 6);
    u2(&mut out, 1);
    u2(&mut out, 7);
    u4(&mut out, body.len() as u32);
    out.extend_from_slice(&body);
    u2(&mut out, 0);
    out
}

fn nop() -> insn::InsnList {
    insn_list! { [NOP] }
}

fn print(message: &str) -> insn::InsnList {
    insn_list! {
        [field GETSTATIC "java/lang/System", "out", "Ljava/io/PrintStream;"]
        [ldc message]
        [method INVOKEVIRTUAL "java/io/PrintStream", "println", "(Ljava/lang/String;)V"]
    }
}

fn timer(site: &mut InjectionSite<'_>) -> Result<(), InstrumentError> {
    site.code()
        .visit_method_insn(opcodes::INVOKESTATIC, "java/lang/System", "nanoTime", "()J", false);
    site.helper().store_as_new_local(&JvmType::Long).map(|_| ())
}

#[test]
fn test_entry_probe_runs_first() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let probe = Probe::new("demo.C", "m", Location::new(Kind::Entry), timer);
    let transformer = Transformer::new(&cache, vec![probe]);
    let out = transformer.try_transform(None, &bytes).unwrap().unwrap();

    let code = code_of(&out, "m");
    assert!(code.max_locals >= 2 + 2);
    assert_eq!(code.code[0], opcodes::INVOKESTATIC);
    assert_eq!(&code.code[3..5], &[opcodes::LSTORE, 2]);
    assert_eq!(
        &code.code[5..],
        &[opcodes::ICONST_1, opcodes::ISTORE, 1, opcodes::RETURN]
    );
    assert!(code.exception_table.is_empty());

    // Methods without a matching probe keep their bytes.
    let original = code_of(&bytes, "guarded");
    let untouched = code_of(&out, "guarded");
    assert_eq!(original.code, untouched.code);
    assert_eq!(original.exception_table, untouched.exception_table);
}

#[test]
fn test_scratch_slots_never_collide() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let probes = vec![
        Probe::new("demo/C", "m", Location::new(Kind::Entry), timer),
        Probe::new("demo/C", "m", Location::new(Kind::Entry), timer),
    ];
    let out = Transformer::new(&cache, probes)
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "m");
    let stores: Vec<u8> = code
        .code
        .windows(2)
        .filter(|w| w[0] == opcodes::LSTORE)
        .map(|w| w[1])
        .collect();
    assert_eq!(stores, vec![2, 4]);
    assert_eq!(code.max_locals, 6);
}

#[test]
fn test_nested_injected_handler_precedes_original() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let guard = |site: &mut InjectionSite<'_>| -> Result<(), InstrumentError> {
        let helper = site.helper();
        let start = helper.new_label();
        let end = helper.new_label();
        let handler = helper.new_label();
        let after = helper.new_label();
        helper.code_sink().visit_label(start);
        helper
            .code_sink()
            .visit_method_insn(opcodes::INVOKESTATIC, "demo/C", "hook", "()V", false);
        helper.code_sink().visit_label(end);
        helper.code_sink().visit_jump_insn(opcodes::GOTO, after);
        helper.code_sink().visit_label(handler);
        helper.register_exception_handler(start, end, handler, Some("java/lang/RuntimeException"))?;
        helper.insert_frame_replace_stack(
            handler,
            &[FrameType::Object("java/lang/RuntimeException".to_string())],
        )?;
        helper.code_sink().visit_insn(opcodes::POP);
        helper.code_sink().visit_label(after);
        helper.insert_frame_same_stack(after)
    };
    let mut location = Location::new(Kind::Call);
    location.set_clazz("demo/C").set_method("work");
    let probe = Probe::new("demo/C", "guarded", location, guard);
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();

    // hook (0..3) goto (3..6) pop (6) work (7..10) goto (10..13) astore (13..15) return (15)
    let code = code_of(&out, "guarded");
    assert_eq!(code.exception_table.len(), 2);
    let injected = code.exception_table[0];
    let original = code.exception_table[1];
    assert_eq!(
        (injected.start_pc, injected.end_pc, injected.handler_pc),
        (0, 3, 6)
    );
    assert_eq!(
        (original.start_pc, original.end_pc, original.handler_pc),
        (0, 10, 13)
    );
    assert_eq!(frame_offsets(&code), vec![6, 7, 13, 15]);
}

#[test]
fn test_error_probe_wraps_body() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let probe = Probe::new("demo/C", "compute", Location::new(Kind::Error), print("failed"));
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();

    // iconst_5 ; ireturn ; handler: dup ; astore 0 ; getstatic ; ldc ; invokevirtual ; athrow
    let code = code_of(&out, "compute");
    assert_eq!(code.exception_table.len(), 1);
    let entry = code.exception_table[0];
    assert_eq!((entry.start_pc, entry.end_pc, entry.handler_pc, entry.catch_type), (0, 2, 2, 0));
    assert_eq!(&code.code[2..5], &[opcodes::DUP, opcodes::ASTORE, 0]);
    assert_eq!(code.code[5], opcodes::GETSTATIC);
    assert_eq!(code.code.last(), Some(&opcodes::ATHROW));
    assert_eq!(frame_offsets(&code), vec![2]);
    assert!(code.max_locals >= 1);
}

#[test]
fn test_return_probe_sees_returned_value() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let inspect = |site: &mut InjectionSite<'_>| -> Result<(), InstrumentError> {
        let slot = site.value_slot().ok_or_else(|| {
            InstrumentError::InvalidType("return value was not captured".to_string())
        })?;
        site.code().visit_var_insn(opcodes::ILOAD, slot);
        site.code().visit_insn(opcodes::POP);
        Ok(())
    };
    let probe = Probe::new("demo/C", "compute", Location::new(Kind::Return), inspect);
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "compute");
    assert_eq!(
        code.code,
        vec![
            opcodes::ICONST_5,
            opcodes::DUP,
            opcodes::ISTORE,
            0,
            opcodes::ILOAD,
            0,
            opcodes::POP,
            opcodes::IRETURN
        ]
    );
    assert_eq!(code.max_locals, 1);
    assert_eq!(code.max_stack, 2);
}

#[test]
fn test_constructor_entry_waits_for_super_call() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let probe = Probe::new("demo/C", "<init>", Location::new(Kind::Entry), print("built"));
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "<init>");
    assert_eq!(&code.code[..3], &[opcodes::ALOAD, 0, opcodes::INVOKESPECIAL]);
    assert_eq!(code.code[5], opcodes::GETSTATIC);
    assert_eq!(code.code.last(), Some(&opcodes::RETURN));
}

#[test]
fn test_line_probe_fires_before_line() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let mut location = Location::new(Kind::Line);
    location.set_line(11);
    let probe = Probe::new("demo/C", "lines", location, print("line 11"));
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "lines");
    assert_eq!(&code.code[..3], &[opcodes::ICONST_0, opcodes::POP, opcodes::GETSTATIC]);
    let lines: Vec<(u16, u16)> = code
        .line_numbers()
        .unwrap()
        .iter()
        .map(|l| (l.start_pc, l.line_number))
        .collect();
    assert_eq!(lines, vec![(0, 10), (2, 11)]);
}

#[test]
fn test_line_probe_fires_after_line() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let mut location = Location::new(Kind::Line);
    location.set_line(10).set_where(Where::After);
    let probe = Probe::new("demo/C", "lines", location, nop());
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "lines");
    assert_eq!(
        code.code,
        vec![opcodes::ICONST_0, opcodes::POP, opcodes::NOP, opcodes::RETURN]
    );

    // The last line ends in a return, so nothing runs after it.
    let mut location = Location::new(Kind::Line);
    location.set_line(11).set_where(Where::After);
    let probe = Probe::new("demo/C", "lines", location, nop());
    let transformer = Transformer::new(&cache, vec![probe]);
    assert!(transformer.try_transform(None, &bytes).unwrap().is_none());
}

#[test]
fn test_call_probe_after_sees_result() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let inspect = |site: &mut InjectionSite<'_>| -> Result<(), InstrumentError> {
        let slot = site.value_slot().ok_or_else(|| {
            InstrumentError::InvalidType("call result was not captured".to_string())
        })?;
        site.code().visit_var_insn(opcodes::ILOAD, slot);
        site.code().visit_insn(opcodes::POP);
        Ok(())
    };
    let mut location = Location::new(Kind::Call);
    location.set_method("value").set_where(Where::After);
    let probe = Probe::new("demo/C", "sum", location, inspect);
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "sum");
    assert_eq!(code.code[0], opcodes::INVOKESTATIC);
    assert_eq!(
        &code.code[3..],
        &[
            opcodes::DUP,
            opcodes::ISTORE,
            0,
            opcodes::ILOAD,
            0,
            opcodes::POP,
            opcodes::POP,
            opcodes::RETURN
        ]
    );
    assert_eq!(code.max_locals, 1);
}

#[test]
fn test_unmatched_locations_keep_javac_bytes() {
    init_logger();
    let bytes = javac_loop_class();
    let cache = ClassCache::new();
    let mut far_line = Location::new(Kind::Line);
    far_line.set_line(9999);
    let mut missing_call = Location::new(Kind::Call);
    missing_call.set_clazz("demo/Missing").set_method("nothing");
    let probes = vec![
        Probe::new("demo/Loop", "loop", far_line, nop()),
        Probe::new("demo/Loop", "loop", missing_call, print("x")),
        Probe::new("demo/Loop", "loop", Location::new(Kind::Throw), print("x")),
    ];
    let transformer = Transformer::new(&cache, probes);
    assert!(transformer.try_transform(None, &bytes).unwrap().is_none());
    let out = transformer.transform(None, &bytes);
    assert!(matches!(out, Cow::Borrowed(_)));
    assert_eq!(&*out, &bytes[..]);
}

#[test]
fn test_line_probe_in_javac_loop() {
    init_logger();
    let bytes = javac_loop_class();
    let cache = ClassCache::new();
    let mut location = Location::new(Kind::Line);
    location.set_line(4);
    let probe = Probe::new("demo/Loop", "loop", location, nop());
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "loop");
    assert_eq!(
        code.code,
        vec![
            opcodes::ILOAD_0,
            opcodes::IFLE,
            0,
            10,
            opcodes::NOP,
            opcodes::IINC,
            0,
            0xff,
            opcodes::GOTO,
            0xff,
            0xf8,
            opcodes::RETURN
        ]
    );
    assert_eq!(frame_offsets(&code), vec![0, 11]);
}

#[test]
fn test_call_probe_after_invocation() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let mut location = Location::new(Kind::Call);
    location
        .set_clazz("demo.C")
        .set_method("work")
        .set_where(Where::After);
    let probe = Probe::new("demo/C", "guarded", location, print("called"));
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "guarded");
    assert_eq!(code.code[0], opcodes::INVOKESTATIC);
    assert_eq!(code.code[3], opcodes::GETSTATIC);
    // The call stays inside the original protected range.
    assert_eq!(code.exception_table.len(), 1);
    assert_eq!(code.exception_table[0].start_pc, 0);
    assert_eq!(code.exception_table[0].end_pc, 11);
}

#[test]
fn test_conflicting_frames_leave_class_unmodified() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let conflict = |site: &mut InjectionSite<'_>| -> Result<(), InstrumentError> {
        let helper = site.helper();
        let label = helper.new_label();
        helper.code_sink().visit_label(label);
        helper.insert_frame_same_stack(label)?;
        helper.insert_frame_replace_stack(label, &[FrameType::Integer])
    };
    let probe = Probe::new("demo/C", "m", Location::new(Kind::Entry), conflict);
    let transformer = Transformer::new(&cache, vec![probe]);

    match transformer.try_transform(None, &bytes) {
        Err(Error::Instrument {
            class,
            method,
            source: InstrumentError::FrameConflict { existing, requested, .. },
        }) => {
            assert_eq!(class, "demo/C");
            assert_eq!(method, "m()V");
            assert_eq!(existing, "same");
            assert_eq!(requested, "replace [int]");
        }
        other => panic!("expected a frame conflict, got {other:?}"),
    }
    let out = transformer.transform(None, &bytes);
    assert!(matches!(out, Cow::Borrowed(_)));
    assert_eq!(&*out, &bytes[..]);
}

#[test]
fn test_repeated_frame_request_is_idempotent() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let twice = |site: &mut InjectionSite<'_>| -> Result<(), InstrumentError> {
        let helper = site.helper();
        let label = helper.new_label();
        helper.code_sink().visit_label(label);
        helper.insert_frame_same_stack(label)?;
        helper.insert_frame_same_stack(label)?;
        helper.code_sink().visit_insn(opcodes::NOP);
        Ok(())
    };
    let probe = Probe::new("demo/C", "m", Location::new(Kind::Entry), twice);
    let out = Transformer::new(&cache, vec![probe])
        .try_transform(None, &bytes)
        .unwrap()
        .unwrap();
    let code = code_of(&out, "m");
    assert_eq!(code.code[0], opcodes::NOP);
    assert_eq!(frame_offsets(&code), vec![0]);
}

#[test]
fn test_unmatched_class_is_byte_identical() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let probes = vec![
        Probe::new("demo/Other", "m", Location::new(Kind::Entry), print("x")),
        Probe::new("demo/C", "missing", Location::new(Kind::Entry), print("x")),
        Probe::new("/demo.*/", "m", Location::new(Kind::Entry), print("x")),
    ];
    let transformer = Transformer::new(&cache, probes);
    assert!(transformer.try_transform(None, &bytes).unwrap().is_none());
    let out = transformer.transform(None, &bytes);
    assert!(matches!(out, Cow::Borrowed(_)));
    assert_eq!(&*out, &bytes[..]);
}

#[test]
fn test_subtype_pattern_uses_loader() {
    init_logger();
    let mid = class_bytes("demo/Mid", "demo/Base", |_| {});
    let sub = class_bytes("demo/Sub", "demo/Mid", |cw| {
        method(cw, ACC_PUBLIC | ACC_STATIC, "run", "()V", |mw| {
            mw.visit_code(0, 0);
            mw.visit_insn(opcodes::RETURN);
            mw.visit_maxs(0, 0);
        });
    });
    let loader = MemoryClassLoader::new();
    loader.define("demo/Mid", mid);
    let cache = ClassCache::new();
    let probe = Probe::new("+demo.Base", "run", Location::new(Kind::Entry), print("sub"));
    let transformer = Transformer::new(&cache, vec![probe]);
    let loader: &dyn ClassLoader = &loader;

    let out = transformer.try_transform(Some(loader), &sub).unwrap();
    assert!(out.is_some());
    assert_eq!(cache.loader_count(), 1);

    let unrelated = Probe::new("+demo.Elsewhere", "run", Location::new(Kind::Entry), print("x"));
    let transformer = Transformer::new(&cache, vec![unrelated]);
    assert!(transformer.try_transform(Some(loader), &sub).unwrap().is_none());
}

#[test]
fn test_cache_is_per_loader() {
    init_logger();
    let bytes = fixture();
    let first = MemoryClassLoader::new();
    first.define("demo/C", bytes.clone());
    let second = MemoryClassLoader::new();
    second.define("demo/C", bytes);
    let cache = ClassCache::new();
    let (first, second): (&dyn ClassLoader, &dyn ClassLoader) = (&first, &second);

    let a = cache.resolve(Some(first), "demo.C").unwrap();
    let b = cache.resolve(Some(first), "demo/C").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    let c = cache.resolve(Some(second), "demo/C").unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert!(c.declares_method("guarded", "()V"));

    cache.loader_unloaded(first.id(), first.generation());
    let d = cache.resolve(Some(first), "demo/C").unwrap();
    assert!(!Arc::ptr_eq(&a, &d));
}

#[test]
fn test_classes_transform_in_parallel() {
    init_logger();
    let bytes = fixture();
    let cache = ClassCache::new();
    let probes = vec![
        Probe::new("demo/C", "m", Location::new(Kind::Entry), timer),
        Probe::new("demo/C", "guarded", Location::new(Kind::Error), print("boom")),
    ];
    let transformer = Transformer::new(&cache, probes);
    let expected = transformer.try_transform(None, &bytes).unwrap().unwrap();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| transformer.try_transform(None, &bytes)))
            .collect();
        for handle in handles {
            let out = handle.join().unwrap().unwrap().unwrap();
            assert_eq!(out, expected);
        }
    });
}
