// End-to-end engine tests: compile, run, suspend, resume.

use questscript::compiler::CompileOptions;
use questscript::error::ErrorKind;
use questscript::vm::{
    Actor, HostEvent, RunResult, ScriptState, Value, Vm, WaitKind, World,
};
use std::sync::Arc;

fn compile(world: &Arc<World>, source: &str) -> Arc<questscript::vm::CompiledScript> {
    world
        .compile(source, "test", &CompileOptions::default())
        .unwrap_or_else(|e| panic!("{}", e.format()))
}

/// Compile and run a script to completion with no actor attached
fn run(source: &str) -> (Arc<World>, ScriptState) {
    let world = World::new();
    let script = compile(&world, source);
    let mut instance = world.instantiate(&script, 0, 0);
    match Vm::new().run(&mut instance) {
        RunResult::Finished => {}
        RunResult::Suspended(kind) => panic!("unexpected suspension: {:?}", kind),
        RunResult::Errored(e) => panic!("{}", e.format()),
    }
    (world, instance)
}

fn global(world: &World, name: &str) -> Value {
    global_at(world, name, 0)
}

fn global_at(world: &World, name: &str, index: u32) -> Value {
    let key: Arc<str> = Arc::from(name);
    world
        .globals
        .lock()
        .get(&key, index)
        .unwrap_or(Value::Int(0))
}

#[test]
fn compilation_is_deterministic() {
    let source = r#"
        $a = 1;
        if ($a > 0) $b = "yes"; else $b = "no";
        for ($i = 0; $i < 3; $i++) $c += $i;
    "#;
    let first = compile(&World::new(), source);
    let second = compile(&World::new(), source);
    assert_eq!(first.code, second.code);
    assert_eq!(first.lines, second.lines);
}

#[test]
fn forward_gotos_converge_on_one_label() {
    let (world, _) = run(r#"
        goto skip;
        $never = 1;
        goto skip;
        $never = 2;
        skip:
        $landed = 1;
    "#);
    assert_eq!(global(&world, "$never"), Value::Int(0));
    assert_eq!(global(&world, "$landed"), Value::Int(1));
}

#[test]
fn arithmetic_and_precedence() {
    let (world, _) = run("$r = 2 + 3 * 4 - 10 / 2;");
    assert_eq!(global(&world, "$r"), Value::Int(9));

    let (world, _) = run("$r = (1 << 4) | (255 & 15) ^ 3;");
    assert_eq!(global(&world, "$r"), Value::Int(16 | (15 ^ 3)));

    let (world, _) = run("$r = -5 % 3; $s = !0; $t = ~0;");
    assert_eq!(global(&world, "$r"), Value::Int(-2));
    assert_eq!(global(&world, "$s"), Value::Int(1));
    assert_eq!(global(&world, "$t"), Value::Int(-1));
}

#[test]
fn string_concat_and_comparison() {
    let (world, _) = run(r#"
        $greeting$ = "hello " + "world";
        $len = strlen($greeting$);
        $eq = $greeting$ == "hello world";
        $mixed$ = "count: " + 3;
    "#);
    assert_eq!(global(&world, "$greeting$"), Value::from("hello world"));
    assert_eq!(global(&world, "$len"), Value::Int(11));
    assert_eq!(global(&world, "$eq"), Value::Int(1));
    assert_eq!(global(&world, "$mixed$"), Value::from("count: 3"));
}

#[test]
fn ternary_and_logical_operators() {
    let (world, _) = run(r#"
        $a = 1 ? 10 : 20;
        $b = 0 ? 10 : 20;
        $c = 1 && 0;
        $d = 1 || 0;
    "#);
    assert_eq!(global(&world, "$a"), Value::Int(10));
    assert_eq!(global(&world, "$b"), Value::Int(20));
    assert_eq!(global(&world, "$c"), Value::Int(0));
    assert_eq!(global(&world, "$d"), Value::Int(1));
}

#[test]
fn for_loop_with_continue() {
    let (world, _) = run(r#"
        .@sum = 0;
        for (.@i = 0; .@i < 5; .@i++) {
            if (.@i == 3) continue;
            .@sum += .@i;
        }
        $sum = .@sum;
    "#);
    assert_eq!(global(&world, "$sum"), Value::Int(7));
}

#[test]
fn while_and_do_while() {
    let (world, _) = run(r#"
        .@i = 0;
        while (.@i < 4) .@i++;
        $w = .@i;

        .@j = 10;
        do { .@j--; } while (.@j > 7);
        $d = .@j;

        .@k = 0;
        do { .@k++; if (.@k < 3) continue; break; } while (1);
        $k = .@k;
    "#);
    assert_eq!(global(&world, "$w"), Value::Int(4));
    assert_eq!(global(&world, "$d"), Value::Int(7));
    assert_eq!(global(&world, "$k"), Value::Int(3));
}

#[test]
fn switch_falls_through_until_break() {
    let (world, _) = run(r#"
        $a = 0;
        switch (2) {
        case 1:
            $a += 1;
        case 2:
            $a += 10;
        case 3:
            $a += 100;
            break;
        case 4:
            $a += 1000;
        }
    "#);
    assert_eq!(global(&world, "$a"), Value::Int(110));
}

#[test]
fn switch_default_and_no_match() {
    let (world, _) = run(r#"
        switch (99) {
        case 1: $hit = 1; break;
        default: $hit = 2; break;
        }
        switch (99) {
        case 1: $other = 1; break;
        }
        $other += 5;
    "#);
    assert_eq!(global(&world, "$hit"), Value::Int(2));
    assert_eq!(global(&world, "$other"), Value::Int(5));
}

#[test]
fn user_function_returns_and_caller_scope_survives() {
    let (world, _) = run(r#"
        function add {
            return getarg(0) + getarg(1);
        }
        .@mine = 7;
        $x = add(2, 3);
        $after = .@mine;
    "#);
    assert_eq!(global(&world, "$x"), Value::Int(5));
    assert_eq!(global(&world, "$after"), Value::Int(7));
}

#[test]
fn function_locals_are_per_frame() {
    let (world, _) = run(r#"
        function clobber {
            .@mine = 999;
            return 0;
        }
        .@mine = 1;
        clobber();
        $kept = .@mine;
    "#);
    assert_eq!(global(&world, "$kept"), Value::Int(1));
}

#[test]
fn getarg_default_for_missing_argument() {
    let (world, _) = run(r#"
        function pick {
            return getarg(1, -1);
        }
        $got = pick(5);
    "#);
    assert_eq!(global(&world, "$got"), Value::Int(-1));
}

#[test]
fn recursion_unwinds_correctly() {
    let (world, _) = run(r#"
        function fact {
            if (getarg(0) <= 1) return 1;
            return getarg(0) * fact(getarg(0) - 1);
        }
        $f = fact(6);
    "#);
    assert_eq!(global(&world, "$f"), Value::Int(720));
}

#[test]
fn sparse_arrays_track_membership_and_size() {
    let (world, _) = run(r#"
        $arr[5] = 7;
        $arr[2] = 9;
        $size1 = getarraysize($arr);
        $at2 = inarray($arr, 9);
        $arr[2] = 0;
        $size2 = getarraysize($arr);
        $gone = inarray($arr, 9);
        $arr[5] = 0;
        $size3 = getarraysize($arr);
    "#);
    assert_eq!(global(&world, "$size1"), Value::Int(6));
    assert_eq!(global(&world, "$at2"), Value::Int(2));
    assert_eq!(global(&world, "$size2"), Value::Int(6));
    assert_eq!(global(&world, "$gone"), Value::Int(-1));
    assert_eq!(global(&world, "$size3"), Value::Int(0));
}

#[test]
fn setarray_copyarray_deletearray() {
    let (world, _) = run(r#"
        setarray $src[0], 10, 20, 30, 40;
        copyarray $dst[0], $src[0], 4;
        deletearray $dst[1], 1;
        $a = $dst[0];
        $b = $dst[1];
        $c = $dst[2];
        $size = getarraysize($dst);
    "#);
    assert_eq!(global(&world, "$a"), Value::Int(10));
    assert_eq!(global(&world, "$b"), Value::Int(30));
    assert_eq!(global(&world, "$c"), Value::Int(40));
    assert_eq!(global(&world, "$size"), Value::Int(3));
}

#[test]
fn cleararray_fills_then_zero_erases() {
    let (world, _) = run(r#"
        cleararray $arr[0], 5, 3;
        $size = getarraysize($arr);
        cleararray $arr[0], 0, 3;
        $empty = getarraysize($arr);
    "#);
    assert_eq!(global(&world, "$size"), Value::Int(3));
    assert_eq!(global(&world, "$empty"), Value::Int(0));
}

#[test]
fn postfix_increment_yields_old_value() {
    let (world, _) = run(r#"
        $i = 5;
        $old = $i++;
        $new = ++$i;
    "#);
    assert_eq!(global(&world, "$old"), Value::Int(5));
    assert_eq!(global(&world, "$new"), Value::Int(7));
    assert_eq!(global(&world, "$i"), Value::Int(7));
}

#[test]
fn runaway_loop_is_cut_off() {
    let world = World::new();
    let script = compile(&world, "while (1) {}");
    let mut instance = world.instantiate(&script, 0, 0);
    match Vm::new().run(&mut instance) {
        RunResult::Errored(e) => assert_eq!(e.kind, ErrorKind::ResourceError),
        other => panic!("expected a resource error, got {:?}", other),
    }
}

#[test]
fn division_by_zero_terminates() {
    let world = World::new();
    let script = compile(&world, "$x = 1 / 0;");
    let mut instance = world.instantiate(&script, 0, 0);
    match Vm::new().run(&mut instance) {
        RunResult::Errored(e) => assert_eq!(e.kind, ErrorKind::RangeError),
        other => panic!("expected a range error, got {:?}", other),
    }
}

#[test]
fn type_mismatch_on_write_terminates() {
    let world = World::new();
    let script = compile(&world, r#"$n = "text";"#);
    let mut instance = world.instantiate(&script, 0, 0);
    assert!(matches!(
        Vm::new().run(&mut instance),
        RunResult::Errored(_)
    ));
}

#[test]
fn input_suspends_and_resumes_with_stack_intact() {
    let world = World::new();
    world.attach_actor(1, Actor::default());
    let script = compile(&world, r#"
        mes "pick a number";
        input $r;
        $x = 1 + $r;
    "#);
    let mut instance = world.instantiate(&script, 1, 0);
    let vm = Vm::new();

    match vm.run(&mut instance) {
        RunResult::Suspended(WaitKind::Input) => {}
        other => panic!("expected an input suspension, got {:?}", other),
    }
    let events = world.drain_events();
    assert!(events.contains(&HostEvent::Message {
        actor: 1,
        text: "pick a number".to_string()
    }));
    assert!(events.contains(&HostEvent::InputRequest {
        actor: 1,
        string_input: false
    }));

    match vm.resume(&mut instance, Value::Int(42)) {
        RunResult::Finished => {}
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(global(&world, "$r"), Value::Int(42));
    assert_eq!(global(&world, "$x"), Value::Int(43));
}

#[test]
fn select_resumes_inside_an_expression() {
    let world = World::new();
    world.attach_actor(1, Actor::default());
    let script = compile(&world, r#"$x = 10 + select("a", "b", "c");"#);
    let mut instance = world.instantiate(&script, 1, 0);
    let vm = Vm::new();

    assert!(matches!(
        vm.run(&mut instance),
        RunResult::Suspended(WaitKind::Input)
    ));
    let menu = world
        .drain_events()
        .into_iter()
        .find_map(|e| match e {
            HostEvent::Menu { options, .. } => Some(options),
            _ => None,
        })
        .unwrap();
    assert_eq!(menu, vec!["a", "b", "c"]);

    assert!(matches!(
        vm.resume(&mut instance, Value::Int(2)),
        RunResult::Finished
    ));
    assert_eq!(global(&world, "$x"), Value::Int(12));
}

#[test]
fn close_finishes_on_the_following_resume() {
    let world = World::new();
    world.attach_actor(1, Actor::default());
    let script = compile(&world, r#"mes "bye"; close; $unreached = 1;"#);
    let mut instance = world.instantiate(&script, 1, 0);
    let vm = Vm::new();

    assert!(matches!(
        vm.run(&mut instance),
        RunResult::Suspended(WaitKind::Input)
    ));
    assert!(world
        .drain_events()
        .contains(&HostEvent::CloseDialog { actor: 1 }));
    assert!(matches!(
        vm.resume(&mut instance, Value::Int(0)),
        RunResult::Finished
    ));
    assert_eq!(global(&world, "$unreached"), Value::Int(0));
}

#[test]
fn sleep_suspends_on_a_timer() {
    let world = World::new();
    let script = compile(&world, "sleep2 250; $woke = 1;");
    let mut instance = world.instantiate(&script, 0, 0);
    let vm = Vm::new();

    match vm.run(&mut instance) {
        RunResult::Suspended(WaitKind::Timer(ms)) => assert_eq!(ms, 250),
        other => panic!("expected a timer suspension, got {:?}", other),
    }
    assert!(matches!(
        vm.resume(&mut instance, Value::Int(0)),
        RunResult::Finished
    ));
    assert_eq!(global(&world, "$woke"), Value::Int(1));
}

#[test]
fn end_stops_execution() {
    let (world, _) = run("$a = 1; end; $b = 1;");
    assert_eq!(global(&world, "$a"), Value::Int(1));
    assert_eq!(global(&world, "$b"), Value::Int(0));
}

#[test]
fn actor_scoped_variables_route_by_attachment() {
    let world = World::new();
    world.attach_actor(
        1,
        Actor {
            account_id: 100,
            char_id: 200,
            ..Actor::default()
        },
    );
    let script = compile(&world, "#acct = 11; counter = 22; @temp = 33;");
    let mut instance = world.instantiate(&script, 1, 0);
    assert!(matches!(Vm::new().run(&mut instance), RunResult::Finished));

    let acct: Arc<str> = Arc::from("#acct");
    let counter: Arc<str> = Arc::from("counter");
    let temp: Arc<str> = Arc::from("@temp");
    assert_eq!(
        world.accounts.lock().get(&100).unwrap().get(&acct, 0),
        Some(Value::Int(11))
    );
    assert_eq!(
        world.characters.lock().get(&200).unwrap().get(&counter, 0),
        Some(Value::Int(22))
    );
    assert_eq!(
        world.char_temps.lock().get(&200).unwrap().get(&temp, 0),
        Some(Value::Int(33))
    );

    // transient per-character storage goes with the actor
    world.detach_actor(1);
    assert!(world.char_temps.lock().get(&200).is_none());
    assert!(world.characters.lock().get(&200).is_some());
}

#[test]
fn actor_writes_without_attachment_are_dropped() {
    let world = World::new();
    let script = compile(&world, "#acct = 5; $done = 1;");
    let mut instance = world.instantiate(&script, 0, 0);
    assert!(matches!(Vm::new().run(&mut instance), RunResult::Finished));
    assert_eq!(global(&world, "$done"), Value::Int(1));
    assert!(world.accounts.lock().is_empty());
    assert!(!instance.warnings.is_empty());
}

#[test]
fn functions_are_callable_across_units() {
    let world = World::new();
    let _lib = compile(&world, r#"
        function double {
            return getarg(0) * 2;
        }
    "#);
    let user = compile(&world, "$x = double(21);");
    let mut instance = world.instantiate(&user, 0, 0);
    assert!(matches!(Vm::new().run(&mut instance), RunResult::Finished));
    assert_eq!(global(&world, "$x"), Value::Int(42));
}

#[test]
fn labels_reset_between_units() {
    let world = World::new();
    let first = compile(&world, "start:\n$a = 1;");
    let second = compile(&world, "start:\n$b = 2;");
    assert_eq!(first.label_offset("start"), Some(0));
    assert_eq!(second.label_offset("start"), Some(0));

    let mut instance = world.instantiate(&second, 0, 0);
    assert!(matches!(Vm::new().run(&mut instance), RunResult::Finished));
    assert_eq!(global(&world, "$b"), Value::Int(2));
}

#[test]
fn jump_to_exported_label_restarts_there() {
    let world = World::new();
    let script = compile(&world, r#"
        $normal = 1;
        end;
        OnEvent:
        $evented = 1;
    "#);
    let mut instance = world.instantiate(&script, 0, 0);
    assert!(matches!(Vm::new().run(&mut instance), RunResult::Finished));
    assert_eq!(global(&world, "$evented"), Value::Int(0));

    let mut again = world.instantiate(&script, 0, 0);
    again.jump_to_label("OnEvent").unwrap();
    assert!(matches!(Vm::new().run(&mut again), RunResult::Finished));
    assert_eq!(global(&world, "$evented"), Value::Int(1));
}

#[test]
fn duplicate_label_is_a_compile_error() {
    let world = World::new();
    let err = world
        .compile("here:\n$a = 1;\nhere:\n$b = 2;", "dup", &CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateLabel);
}

#[test]
fn unknown_callee_is_a_compile_error() {
    let world = World::new();
    let err = world
        .compile("$x = summon_dragon(3);", "bad", &CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedFunction);
}

#[test]
fn npc_vars_persist_across_instances_of_one_script() {
    let world = World::new();
    let script = compile(&world, ".visits = .visits + 1; $seen = .visits;");
    let vm = Vm::new();

    let mut first = world.instantiate(&script, 0, 0);
    assert!(matches!(vm.run(&mut first), RunResult::Finished));
    let mut second = world.instantiate(&script, 0, 0);
    assert!(matches!(vm.run(&mut second), RunResult::Finished));
    assert_eq!(global(&world, "$seen"), Value::Int(2));
}

#[test]
fn instance_vars_do_not_leak_between_instances() {
    let world = World::new();
    let script = compile(&world, "'mine = 'mine + 1; $seen = 'mine;");
    let vm = Vm::new();

    let mut first = world.instantiate(&script, 0, 0);
    assert!(matches!(vm.run(&mut first), RunResult::Finished));
    let mut second = world.instantiate(&script, 0, 0);
    assert!(matches!(vm.run(&mut second), RunResult::Finished));
    assert_eq!(global(&world, "$seen"), Value::Int(1));
}

#[test]
fn unload_waits_for_live_instances() {
    let world = World::new();
    let script = compile(&world, "$a = 1;");
    assert!(script.can_unload());
    let instance = world.instantiate(&script, 0, 0);
    assert!(!script.can_unload());
    drop(instance);
    assert!(script.can_unload());
}

#[test]
fn keywords_and_names_are_case_insensitive() {
    let (world, _) = run(r#"
        $A = 3;
        IF ($a == 3) $hit = 1;
    "#);
    assert_eq!(global(&world, "$hit"), Value::Int(1));
}

#[test]
fn string_array_slots() {
    let (world, _) = run(r#"
        setarray $names$[0], "ada", "grace";
        $first$ = $names$[0];
        $second$ = $names$[1];
    "#);
    assert_eq!(global(&world, "$first$"), Value::from("ada"));
    assert_eq!(global_at(&world, "$names$", 1), Value::from("grace"));
    assert_eq!(global(&world, "$second$"), Value::from("grace"));
}
