use lunapr_vm::{Interpreter, MAX_CALL_DEPTH, exceptions::format_exception};

fn run(source: &str) -> Vec<String> {
    Interpreter::default().enter(|vm| match vm.run_source(source, "=test") {
        Ok(values) => values.iter().map(ToString::to_string).collect(),
        Err(exc) => panic!("{}", format_exception(&exc)),
    })
}

fn run_err(source: &str) -> String {
    Interpreter::default().enter(|vm| match vm.run_source(source, "=test") {
        Ok(values) => panic!("expected an error, got {values:?}"),
        Err(exc) => exc.message(),
    })
}

#[test]
fn test_integer_and_float_arithmetic() {
    assert_eq!(
        run("return 7 // 2, 7 / 2, 7 % -3, -7 // 2, 2^10, 1 + 1.0, math.maxinteger + 1 == math.mininteger"),
        ["3", "3.5", "-2", "-4", "1024.0", "2.0", "true"]
    );
    assert_eq!(run_err("return 1 // 0"), "test:1: attempt to perform 'n//0'");
}

#[test]
fn test_methods_and_objects() {
    assert_eq!(
        run("local Account = {}
             Account.__index = Account
             function Account.new(balance) return {balance = balance, deposit = Account.deposit} end
             function Account:deposit(v) self.balance = self.balance + v return self end
             local a = Account.new(10)
             a:deposit(5):deposit(7)
             return a.balance"),
        ["22"]
    );
}

#[test]
fn test_string_coercion_and_concat() {
    assert_eq!(
        run("return '10' + 5, 1 .. 2, 'n=' .. 1.5, #'hello', ('x'):rep(3)"),
        ["15", "12", "n=1.5", "5", "xxx"]
    );
    assert_eq!(
        run_err("local t = {} return 'a' .. t"),
        "test:1: attempt to concatenate a table value (local 't')"
    );
}

#[test]
fn test_repeat_and_while() {
    assert_eq!(
        run("local i, out = 0, {}
             repeat i = i + 1 out[#out + 1] = i until i >= 3
             while i > 0 do i = i - 1 if i == 1 then break end end
             return table.concat(out, ''), i"),
        ["123", "1"]
    );
}

#[test]
fn test_deep_recursion_reports_stack_overflow() {
    // the default test thread stack is too small for the full call depth
    let message = std::thread::Builder::new()
        .stack_size(32 * 1024 * 1024)
        .spawn(|| run_err("local function f(n) return f(n + 1) + 1 end return f(1)"))
        .unwrap()
        .join()
        .unwrap();
    assert!(message.ends_with("stack overflow"), "{message}");
    assert!(MAX_CALL_DEPTH >= 100);
}

#[test]
fn test_uncaught_error_traceback() {
    Interpreter::default().enter(|vm| {
        let exc = vm
            .run_source(
                "local function fail()\n  error('bad thing')\nend\nfail()",
                "@script.lua",
            )
            .unwrap_err();
        assert_eq!(
            format_exception(&exc),
            "script.lua:2: bad thing\n\
             stack traceback:\n\
             \t[C]: in function 'error'\n\
             \tscript.lua:2: in function 'fail'\n\
             \tscript.lua:4: in main chunk"
        );
    });
}
