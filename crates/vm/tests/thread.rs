use lunapr_vm::{
    Interpreter, Value, marshal,
    stdlib::thread::{ThreadError, ThreadHandle, ThreadStatus},
};

fn run(source: &str) -> Vec<String> {
    Interpreter::default().enter(|vm| match vm.run_source(source, "=test") {
        Ok(values) => values.iter().map(ToString::to_string).collect(),
        Err(exc) => panic!("{}", lunapr_vm::exceptions::format_exception(&exc)),
    })
}

#[test]
fn test_join_returns_results() {
    assert_eq!(
        run("local t = apr.thread(function(...) return ... end, 1, 'two', true)
             return t:join()"),
        ["true", "1", "two", "true"]
    );
}

#[test]
fn test_worker_error_becomes_join_result() {
    let res = run("local t = apr.thread(function() error('boom') end)
                   local ok, msg = t:join()
                   return ok, msg, t:status()");
    assert_eq!(res[0], "false");
    assert!(res[1].contains("boom"), "{}", res[1]);
    assert!(res[1].contains("stack traceback:"), "{}", res[1]);
    assert_eq!(res[2], "error");
}

#[test]
fn test_double_join_is_cached() {
    assert_eq!(
        run("local t = apr.thread(function() return {n = 5}, 'x' end)
             local a = {t:join()}
             local b = {t:join()}
             return a[1], a[2].n, a[3], b[1], b[2].n, b[3], tostring(t)"),
        ["true", "5", "x", "true", "5", "x", "thread (done)"]
    );
}

#[test]
fn test_join_after_detach_is_rejected() {
    assert_eq!(
        run("local t = apr.thread(function() return 1 end)
             local detached = t:detach()
             local again, err1 = t:detach()
             local res, err2 = t:join()
             return detached, again, err1, res, err2, t:status()"),
        [
            "true",
            "nil",
            "thread has already been detached",
            "nil",
            "thread has been detached",
            "detach"
        ]
    );
}

#[test]
fn test_status_right_after_spawn() {
    let res = run("local t = apr.thread(function() apr.sleep(0.2) return 'slept' end)
                   local status = t:status()
                   local _, value = t:join()
                   return status, value, t:status()");
    assert!(res[0] == "init" || res[0] == "running", "{}", res[0]);
    assert_eq!(res[1..], ["slept", "done"]);
}

#[test]
fn test_dropped_handle_still_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let signal = dir.path().join("signal.txt");
    Interpreter::default().enter(|vm| {
        vm.set_global("signal", signal.to_string_lossy().into_owned());
        vm.run_source(
            "apr.thread(function(path)
               apr.sleep(0.05)
               local f = assert(io.open(path, 'w'))
               f:write('finished')
               f:close()
             end, signal)",
            "=test",
        )
        .unwrap();
    });
    assert_eq!(std::fs::read_to_string(&signal).unwrap(), "finished");
}

#[test]
fn test_concurrent_threads_return_their_own_index() {
    let res = run("local threads = {}
                   for i = 1, 8 do
                     threads[i] = apr.thread(function(n)
                       local acc = 0
                       for _ = 1, 1000 do acc = acc + 1 end
                       return n, acc
                     end, i)
                   end
                   local seen = {}
                   for i = 1, 8 do
                     local ok, n, acc = threads[i]:join()
                     assert(ok and acc == 1000)
                     seen[#seen + 1] = n
                   end
                   return table.concat(seen, ',')");
    assert_eq!(res, ["1,2,3,4,5,6,7,8"]);
}

#[test]
fn test_source_text_callable() {
    assert_eq!(
        run("local t = apr.thread('local a, b = ... return a * b', 6, 7)
             return t:join()"),
        ["true", "42"]
    );
}

#[test]
fn test_closure_upvalues_travel_with_function() {
    assert_eq!(
        run("local base = {offset = 100}
             local function add(x) return base.offset + x end
             local t = apr.thread(function(v) return add(v) end, 5)
             return t:join()"),
        ["true", "105"]
    );
}

#[test]
fn test_native_function_cannot_cross() {
    let res = run("return pcall(apr.thread, function() end, print)");
    assert_eq!(res[0], "false");
    assert!(
        res[1].ends_with("cannot serialize native function 'print'"),
        "{}",
        res[1]
    );
}

#[test]
fn test_nested_threads() {
    assert_eq!(
        run("local t = apr.thread(function()
               local inner = apr.thread(function(x) return x + 1 end, 41)
               local _, v = inner:join()
               return v
             end)
             return t:join()"),
        ["true", "42"]
    );
}

#[test]
fn test_rust_surface_spawn_and_join() {
    Interpreter::default().enter(|vm| {
        let func = vm
            .run_source("return function(a, b) return a .. b end", "=test")
            .unwrap()
            .remove(0);
        let handle =
            ThreadHandle::spawn(vm, &func, &[Value::from("lun"), Value::from("apr")]).unwrap();
        let output = handle.join().unwrap().unwrap();
        assert_eq!(handle.status(), ThreadStatus::Done);
        assert!(handle.is_joined());
        let values = marshal::deserialize(vm, &output).unwrap();
        assert_eq!(values[0].as_str(), Some("lunapr"));
        assert!(matches!(handle.detach(), Err(ThreadError::Detach(_))));
    });
}

#[test]
fn test_deeply_nested_argument() {
    let res = std::thread::Builder::new()
        .stack_size(8 * 1024 * 1024)
        .spawn(|| {
            run("nested = nil
                 for i = 1, 30000 do nested = {nested} end
                 local t = apr.thread(function(x)
                   local n = 0
                   while x do n = n + 1 x = x[1] end
                   return n
                 end, nested)
                 return t:join()")
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(res, ["true", "30000"]);
}

#[test]
fn test_unjoined_handles_are_joined_at_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let in_global = dir.path().join("global.txt");
    let in_cycle = dir.path().join("cycle.txt");
    let interp = Interpreter::default();
    interp.enter(|vm| {
        vm.set_global("global_path", in_global.to_string_lossy().into_owned());
        vm.set_global("cycle_path", in_cycle.to_string_lossy().into_owned());
        vm.run_source(
            "local function write_later(path)
               apr.sleep(0.2)
               local f = assert(io.open(path, 'w'))
               f:write('finished')
               f:close()
             end
             worker = apr.thread(write_later, global_path)
             local t = apr.thread(write_later, cycle_path)
             local function keep() return keep, t end",
            "=test",
        )
        .unwrap();
    });
    drop(interp);
    assert_eq!(std::fs::read_to_string(&in_global).unwrap(), "finished");
    assert_eq!(std::fs::read_to_string(&in_cycle).unwrap(), "finished");
}
