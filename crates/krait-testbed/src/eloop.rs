//! Event loop and future doubles.
//!
//! `run_forever` drains threadsafe callbacks, advances scripted futures
//! by one countdown step per cycle, runs done callbacks, and parks with
//! the lock released until a threadsafe callback arrives. `stop()`
//! requests return, exactly one cycle's worth of work later.

use std::mem;

use krait_abi::RawObjectPtr;

use crate::calls;
use crate::errors;
use crate::lock;
use crate::object::{
    alloc, decref, incref, obj, Concluded, CoroOutcome, FutureState, LoopObject, LoopState, Value,
};
use crate::singletons::sing;
use parking_lot::{Condvar, Mutex};

fn loop_of(loop_ptr: RawObjectPtr) -> Option<&'static LoopObject> {
    match &unsafe { obj(loop_ptr) }.value {
        Value::EventLoop(event_loop) => {
            // Loop objects live as long as any table pointer to them.
            Some(unsafe { mem::transmute::<&LoopObject, &'static LoopObject>(event_loop) })
        }
        _ => None,
    }
}

fn future_state(future: RawObjectPtr) -> Option<&'static Mutex<FutureState>> {
    match &unsafe { obj(future) }.value {
        Value::Future(state) => {
            Some(unsafe { mem::transmute::<&Mutex<FutureState>, &'static Mutex<FutureState>>(state) })
        }
        _ => None,
    }
}

pub(crate) fn new_event_loop() -> RawObjectPtr {
    alloc(Value::EventLoop(LoopObject {
        state: Mutex::new(LoopState {
            callbacks: Vec::new(),
            futures: Vec::new(),
            stop_requested: false,
            closed: false,
        }),
        wake: Mutex::new(false),
        wake_cv: Condvar::new(),
    }))
}

pub(crate) fn request_stop(loop_ptr: RawObjectPtr) {
    if let Some(event_loop) = loop_of(loop_ptr) {
        event_loop.state.lock().stop_requested = true;
    }
}

pub(crate) fn close_loop(loop_ptr: RawObjectPtr) {
    if let Some(event_loop) = loop_of(loop_ptr) {
        event_loop.state.lock().closed = true;
    }
}

pub(crate) fn call_soon_threadsafe(loop_ptr: RawObjectPtr, callback: RawObjectPtr) {
    if let Some(event_loop) = loop_of(loop_ptr) {
        incref(callback);
        event_loop.state.lock().callbacks.push(callback);
        *event_loop.wake.lock() = true;
        event_loop.wake_cv.notify_all();
    }
}

/// Stop the loop that drives `future`. Backs the done-callback lambda.
pub(crate) fn stop_loop_of(future: RawObjectPtr) {
    if let Some(state) = future_state(future) {
        let loop_ptr = state.lock().event_loop;
        request_stop(loop_ptr);
    }
}

fn run_callback(callback: RawObjectPtr, args: &[RawObjectPtr]) {
    match calls::invoke(callback, args, std::ptr::null_mut()) {
        Ok(result) => decref(result),
        Err(()) => errors::clear(),
    }
    decref(callback);
}

pub(crate) fn run_forever(loop_ptr: RawObjectPtr) -> Result<RawObjectPtr, ()> {
    let s = sing();
    let Some(event_loop) = loop_of(loop_ptr) else {
        errors::raise(s.exc_type_error, "run_forever() requires an event loop");
        return Err(());
    };
    loop {
        if event_loop.state.lock().closed {
            errors::raise(s.exc_runtime_error, "event loop is closed");
            return Err(());
        }

        let callbacks: Vec<RawObjectPtr> =
            event_loop.state.lock().callbacks.drain(..).collect();
        for callback in callbacks {
            run_callback(callback, &[]);
        }

        let futures: Vec<RawObjectPtr> = event_loop.state.lock().futures.clone();
        let mut counting_down = false;
        for future in &futures {
            step_future(*future, &mut counting_down);
        }
        for future in &futures {
            for callback in take_ready_callbacks(*future) {
                run_callback(callback, &[*future]);
            }
        }

        {
            let mut state = event_loop.state.lock();
            state.futures.retain(|future| {
                if future_done(*future) {
                    decref(*future);
                    false
                } else {
                    true
                }
            });
            if state.stop_requested {
                state.stop_requested = false;
                incref(s.none);
                return Ok(s.none);
            }
        }

        if counting_down {
            continue;
        }

        // Idle: park with the interpreter lock released, as the real
        // loop does, so other threads can schedule work.
        let mut woke = event_loop.wake.lock();
        if !*woke {
            lock::release();
            event_loop.wake_cv.wait(&mut woke);
            lock::acquire();
        }
        *woke = false;
    }
}

fn step_future(future: RawObjectPtr, counting_down: &mut bool) {
    let Some(state) = future_state(future) else {
        return;
    };
    let mut state = state.lock();
    if state.concluded.is_some() {
        return;
    }
    if matches!(state.outcome, CoroOutcome::Pending) {
        return;
    }
    if state.countdown > 0 {
        state.countdown -= 1;
        *counting_down = true;
        return;
    }
    let s = sing();
    let outcome = mem::replace(&mut state.outcome, CoroOutcome::Pending);
    state.concluded = Some(match outcome {
        CoroOutcome::Value(value) => Concluded::Value(value),
        CoroOutcome::StopSignal(terminal) => Concluded::Error(errors::new_exception(
            s.exc_stop_iteration,
            "",
            Some(terminal),
            Vec::new(),
        )),
        CoroOutcome::Error { ty, message } => Concluded::Error(errors::new_exception(
            ty,
            message,
            None,
            vec![
                "  File \"task.py\", line 7, in run\n".to_string(),
                "    raise exc\n".to_string(),
            ],
        )),
        CoroOutcome::Pending => return,
    });
    state.callbacks_pending = true;
}

fn take_ready_callbacks(future: RawObjectPtr) -> Vec<RawObjectPtr> {
    let Some(state) = future_state(future) else {
        return Vec::new();
    };
    let mut state = state.lock();
    if state.concluded.is_some() && state.callbacks_pending {
        state.callbacks_pending = false;
        state.callbacks.drain(..).collect()
    } else {
        Vec::new()
    }
}

// ============================================================================
// asyncio module functions
// ============================================================================

fn kwarg(kwargs: RawObjectPtr, name: &str) -> Option<RawObjectPtr> {
    if kwargs.is_null() {
        return None;
    }
    let Value::Dict(entries) = &unsafe { obj(kwargs) }.value else {
        return None;
    };
    let entries = entries.lock();
    entries.iter().find_map(|(key, value)| {
        match &unsafe { obj(*key) }.value {
            Value::Str { text, .. } if text == name => Some(*value),
            _ => None,
        }
    })
}

pub(crate) fn ensure_future(
    awaitable: RawObjectPtr,
    kwargs: RawObjectPtr,
) -> Result<RawObjectPtr, ()> {
    let s = sing();
    let Value::Coroutine(plan) = &unsafe { obj(awaitable) }.value else {
        errors::raise(s.exc_type_error, "ensure_future() requires an awaitable");
        return Err(());
    };
    let Some(loop_ptr) = kwarg(kwargs, "loop") else {
        errors::raise(s.exc_type_error, "ensure_future() requires a loop");
        return Err(());
    };
    let Some(event_loop) = loop_of(loop_ptr) else {
        errors::raise(s.exc_type_error, "loop argument is not an event loop");
        return Err(());
    };

    let (countdown, outcome) = {
        let mut plan = plan.lock();
        if plan.consumed {
            errors::raise(s.exc_runtime_error, "coroutine was already awaited");
            return Err(());
        }
        plan.consumed = true;
        (
            plan.countdown,
            mem::replace(&mut plan.outcome, CoroOutcome::Pending),
        )
    };

    incref(loop_ptr);
    let future = alloc(Value::Future(Mutex::new(FutureState {
        countdown,
        outcome,
        concluded: None,
        callbacks: Vec::new(),
        callbacks_pending: false,
        event_loop: loop_ptr,
    })));
    incref(future);
    event_loop.state.lock().futures.push(future);
    Ok(future)
}

// ============================================================================
// Future methods
// ============================================================================

pub(crate) fn future_done(future: RawObjectPtr) -> bool {
    future_state(future).is_some_and(|state| state.lock().concluded.is_some())
}

pub(crate) fn future_cancelled(future: RawObjectPtr) -> bool {
    future_state(future)
        .is_some_and(|state| matches!(state.lock().concluded, Some(Concluded::Cancelled)))
}

pub(crate) fn future_cancel(future: RawObjectPtr) -> bool {
    let Some(state) = future_state(future) else {
        return false;
    };
    let mut state = state.lock();
    if state.concluded.is_some() {
        return false;
    }
    state.concluded = Some(Concluded::Cancelled);
    state.callbacks_pending = true;
    true
}

pub(crate) fn future_add_done_callback(future: RawObjectPtr, callback: RawObjectPtr) {
    if let Some(state) = future_state(future) {
        incref(callback);
        let mut state = state.lock();
        state.callbacks.push(callback);
        if state.concluded.is_some() {
            state.callbacks_pending = true;
        }
    }
}

pub(crate) fn future_exception(future: RawObjectPtr) -> Result<RawObjectPtr, ()> {
    let s = sing();
    let Some(state) = future_state(future) else {
        errors::raise(s.exc_type_error, "exception() requires a future");
        return Err(());
    };
    let state = state.lock();
    match &state.concluded {
        Some(Concluded::Error(exc)) => {
            incref(*exc);
            Ok(*exc)
        }
        Some(Concluded::Value(_)) => {
            incref(s.none);
            Ok(s.none)
        }
        Some(Concluded::Cancelled) => {
            errors::raise(s.exc_cancelled_error, "future was cancelled");
            Err(())
        }
        None => {
            errors::raise(s.exc_runtime_error, "future is not done");
            Err(())
        }
    }
}

pub(crate) fn future_result(future: RawObjectPtr) -> Result<RawObjectPtr, ()> {
    let s = sing();
    let Some(state) = future_state(future) else {
        errors::raise(s.exc_type_error, "result() requires a future");
        return Err(());
    };
    let state = state.lock();
    match &state.concluded {
        Some(Concluded::Value(value)) => {
            incref(*value);
            Ok(*value)
        }
        Some(Concluded::Error(exc)) => {
            errors::raise_object(*exc);
            Err(())
        }
        Some(Concluded::Cancelled) => {
            errors::raise(s.exc_cancelled_error, "future was cancelled");
            Err(())
        }
        None => {
            errors::raise(s.exc_runtime_error, "future is not done");
            Err(())
        }
    }
}
