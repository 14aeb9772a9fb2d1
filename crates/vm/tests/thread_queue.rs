use lunapr_vm::{Interpreter, exceptions::format_exception};

fn run(source: &str) -> Vec<String> {
    Interpreter::default().enter(|vm| match vm.run_source(source, "=test") {
        Ok(values) => values.iter().map(ToString::to_string).collect(),
        Err(exc) => panic!("{}", format_exception(&exc)),
    })
}

#[test]
fn test_fifo_and_would_block() {
    assert_eq!(
        run("local q = apr.thread_queue(2)
             assert(q:push('a'))
             assert(q:push('b', 2))
             local full, msg, code = q:trypush('c')
             local x = q:pop()
             local y, n = q:pop()
             local none, _, empty_code = q:trypop()
             return full, code, x, y, n, none, empty_code"),
        ["nil", "EAGAIN", "a", "b", "2", "nil", "EAGAIN"]
    );
}

#[test]
fn test_terminated_queue_reports_eof() {
    assert_eq!(
        run("local q = apr.thread_queue()
             q:push(1)
             q:terminate()
             local a, msg, code = q:pop()
             local b, _, push_code = q:push(2)
             return a, msg, code, b, push_code"),
        ["nil", "End of file found", "EOF", "nil", "EOF"]
    );
}

#[test]
fn test_cross_thread_producer_consumer() {
    assert_eq!(
        run("local q = apr.thread_queue(4)
             local consumer = apr.thread(function(queue, count)
               local sum = 0
               for _ = 1, count do sum = sum + queue:pop() end
               return sum
             end, q, 100)
             for i = 1, 100 do assert(q:push(i)) end
             return consumer:join()"),
        ["true", "5050"]
    );
}

#[test]
fn test_results_flow_back_through_queue() {
    assert_eq!(
        run("local jobs, results = apr.thread_queue(8), apr.thread_queue(8)
             local workers = {}
             for w = 1, 3 do
               workers[w] = apr.thread(function(jobs, results)
                 while true do
                   local job = jobs:pop()
                   if job == nil then break end
                   results:push(job * job)
                 end
               end, jobs, results)
             end
             local total = 0
             for i = 1, 6 do jobs:push(i) end
             for _ = 1, 6 do total = total + results:pop() end
             jobs:terminate()
             for w = 1, 3 do assert(workers[w]:join()) end
             return total"),
        ["91"]
    );
}

#[test]
fn test_interrupt_wakes_waiting_consumer() {
    assert_eq!(
        run("local q = apr.thread_queue(1)
             local t = apr.thread(function(queue)
               local value, msg, code = queue:pop()
               return value, code
             end, q)
             while t:status() == 'init' or t:status() == 'running' do
               q:interrupt()
               apr.sleep(0.01)
             end
             return t:join()"),
        ["true", "nil", "EINTR"]
    );
}

#[test]
fn test_closed_queue_object() {
    Interpreter::default().enter(|vm| {
        let res = vm
            .run_source("local q = apr.thread_queue() q:close() return tostring(q)", "=test")
            .unwrap();
        assert_eq!(res[0].as_str(), Some("thread queue (closed)"));
        let exc = vm
            .run_source("local q = apr.thread_queue() q:close() q:push(1)", "=test")
            .unwrap_err();
        assert_eq!(exc.message(), "test:1: attempt to use a closed thread queue");
    });
}
