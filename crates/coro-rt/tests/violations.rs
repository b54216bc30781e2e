// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Contract violations are fatal. On the main coroutine they surface as a
//! panic carrying the violation message.

use std::cell::RefCell;
use std::rc::Rc;

use coro_rt::{CoFuture, Runtime, Violation};

fn parked_future(rt: &Runtime) -> CoFuture {
    let slot: Rc<RefCell<Option<CoFuture>>> = Rc::new(RefCell::new(None));
    {
        let slot = slot.clone();
        rt.spawn("parked", move |s| {
            *slot.borrow_mut() = Some(s.new_future());
            s.block();
        })
        .unwrap();
    }
    rt.dispatch();
    let fut = slot.borrow_mut().take().unwrap();
    fut
}

#[test]
#[should_panic(expected = "woken twice")]
fn double_wake_is_fatal() {
    let rt = Runtime::setup(2).unwrap();
    let fut = parked_future(&rt);
    rt.wake(&fut);
    rt.wake(&fut);
}

#[test]
#[should_panic(expected = "stale")]
fn waking_consumed_future_is_fatal() {
    let rt = Runtime::setup(2).unwrap();
    let fut = parked_future(&rt);
    rt.wake(&fut);
    rt.dispatch();
    rt.wake(&fut);
}

#[test]
#[should_panic(expected = "stale")]
fn superseded_future_is_fatal() {
    let rt = Runtime::setup(2).unwrap();
    let fut = parked_future(&rt);
    // clear_block issues a fresh token, leaving the old one behind.
    rt.clear_block(fut.owner());
    rt.wake(&fut);
}

#[test]
#[should_panic(expected = "no ready coroutine")]
fn block_with_nothing_ready_is_fatal() {
    let rt = Runtime::setup(2).unwrap();
    rt.block();
}

#[test]
#[should_panic(expected = "not BLOCKED")]
fn clear_block_on_ready_coroutine_is_fatal() {
    let rt = Runtime::setup(2).unwrap();
    let id = rt.spawn("runnable", |_| {}).unwrap();
    rt.clear_block(id);
}

#[test]
fn violation_messages_name_the_coroutine() {
    let v = Violation::DoubleWake {
        name: "client".to_string(),
    };
    assert_eq!(
        v.to_string(),
        "future of coroutine `client` woken twice (already ready)"
    );
    let v = Violation::NotBlocked {
        name: "client".to_string(),
        status: coro_rt::Status::Sleeping,
    };
    assert!(v.to_string().contains("it is SLEEPING, not BLOCKED"));
}
