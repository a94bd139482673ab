//! Attribute resolution, calls, rendering and comparison.
//!
//! The double implements just enough of the object protocol for the
//! layer above: bound methods on generators, loops and futures, the two
//! modules it imports, and string forms for error messages.

use krait_abi::RawObjectPtr;

use crate::eloop;
use crate::errors;
use crate::object::{
    alloc, decref, incref, obj, Builtin, CoroOutcome, CoroPlan, FnKind, MethodKind, Value,
};
use crate::singletons::{sing, type_of};

fn bind(recv: RawObjectPtr, kind: MethodKind) -> RawObjectPtr {
    incref(recv);
    alloc(Value::Builtin(Builtin::Method { recv, kind }))
}

/// Resolve `name` on `target`, returning a new reference.
pub(crate) fn getattr_impl(target: RawObjectPtr, name: &str) -> Result<RawObjectPtr, ()> {
    let s = sing();
    let found = match &unsafe { obj(target) }.value {
        Value::Module { attrs } => attrs.iter().find(|(n, _)| *n == name).map(|(_, value)| {
            incref(*value);
            *value
        }),
        Value::Type(kind) => match name {
            "__name__" => Some(crate::object::new_str(kind.name())),
            _ => None,
        },
        Value::Exception(data) => match name {
            "value" => data.value_attr.map(|value| {
                incref(value);
                value
            }),
            "__traceback__" => Some(match data.traceback {
                Some(traceback) => {
                    incref(traceback);
                    traceback
                }
                None => {
                    incref(s.none);
                    s.none
                }
            }),
            _ => None,
        },
        Value::Generator(_) => match name {
            "send" => Some(bind(target, MethodKind::GenSend)),
            "close" => Some(bind(target, MethodKind::GenClose)),
            _ => None,
        },
        Value::AsyncGenerator(_) => match name {
            "__aiter__" => Some(bind(target, MethodKind::AiterSelf)),
            "__anext__" => Some(bind(target, MethodKind::AnextStep)),
            _ => None,
        },
        Value::EventLoop(_) => match name {
            "run_forever" => Some(bind(target, MethodKind::LoopRunForever)),
            "stop" => Some(bind(target, MethodKind::LoopStop)),
            "call_soon_threadsafe" => Some(bind(target, MethodKind::LoopCallSoonThreadsafe)),
            "close" => Some(bind(target, MethodKind::LoopClose)),
            _ => None,
        },
        Value::Future(_) => match name {
            "done" => Some(bind(target, MethodKind::FutDone)),
            "cancelled" => Some(bind(target, MethodKind::FutCancelled)),
            "exception" => Some(bind(target, MethodKind::FutException)),
            "result" => Some(bind(target, MethodKind::FutResult)),
            "cancel" => Some(bind(target, MethodKind::FutCancel)),
            "add_done_callback" => Some(bind(target, MethodKind::FutAddDoneCallback)),
            _ => None,
        },
        Value::Dict(_) | Value::MappingProxy { .. } => match name {
            "items" => Some(bind(target, MethodKind::MapItems)),
            _ => None,
        },
        Value::Coroutine(_) => match name {
            // Enough for awaitable duck checks.
            "__await__" => Some(bind(target, MethodKind::GenSend)),
            _ => None,
        },
        _ => None,
    };
    match found {
        Some(value) => Ok(value),
        None => {
            errors::raise(
                s.exc_attribute_error,
                format!("'{}' object has no attribute '{name}'", type_name(target)),
            );
            Err(())
        }
    }
}

pub(crate) fn hasattr_impl(target: RawObjectPtr, name: &str) -> bool {
    match getattr_impl(target, name) {
        Ok(value) => {
            decref(value);
            true
        }
        Err(()) => {
            errors::clear();
            false
        }
    }
}

pub(crate) fn type_name(target: RawObjectPtr) -> &'static str {
    match &unsafe { obj(type_of(target)) }.value {
        Value::Type(kind) => kind.name(),
        _ => "object",
    }
}

/// Call `callable`, returning a new reference.
pub(crate) fn invoke(
    callable: RawObjectPtr,
    args: &[RawObjectPtr],
    kwargs: RawObjectPtr,
) -> Result<RawObjectPtr, ()> {
    let s = sing();
    let builtin = match &unsafe { obj(callable) }.value {
        Value::Builtin(builtin) => builtin,
        _ => {
            errors::raise(
                s.exc_type_error,
                format!("'{}' object is not callable", type_name(callable)),
            );
            return Err(());
        }
    };
    match builtin {
        Builtin::StopWhenDone => {
            // fut.get_loop().stop()
            let future = one_arg(args)?;
            eloop::stop_loop_of(future);
            incref(s.none);
            Ok(s.none)
        }
        Builtin::Method { recv, kind } => dispatch_method(*recv, kind, args),
        Builtin::Function(kind) => match kind {
            FnKind::NewEventLoop => Ok(eloop::new_event_loop()),
            FnKind::EnsureFuture => eloop::ensure_future(one_arg(args)?, kwargs),
            FnKind::FormatTb => format_tb(one_arg(args)?),
        },
    }
}

fn one_arg(args: &[RawObjectPtr]) -> Result<RawObjectPtr, ()> {
    match args.first() {
        Some(arg) => Ok(*arg),
        None => {
            errors::raise(sing().exc_type_error, "expected 1 argument, got 0");
            Err(())
        }
    }
}

fn dispatch_method(
    recv: RawObjectPtr,
    kind: &MethodKind,
    args: &[RawObjectPtr],
) -> Result<RawObjectPtr, ()> {
    let s = sing();
    match kind {
        MethodKind::GenSend => gen_send(recv, one_arg(args)?),
        MethodKind::GenClose => gen_close(recv),
        MethodKind::AiterSelf => {
            incref(recv);
            Ok(recv)
        }
        MethodKind::AnextStep => anext_step(recv),
        MethodKind::LoopRunForever => eloop::run_forever(recv),
        MethodKind::LoopStop => {
            eloop::request_stop(recv);
            incref(s.none);
            Ok(s.none)
        }
        MethodKind::LoopCallSoonThreadsafe => {
            eloop::call_soon_threadsafe(recv, one_arg(args)?);
            incref(s.none);
            Ok(s.none)
        }
        MethodKind::LoopClose => {
            eloop::close_loop(recv);
            incref(s.none);
            Ok(s.none)
        }
        MethodKind::FutDone => Ok(bool_obj(eloop::future_done(recv))),
        MethodKind::FutCancelled => Ok(bool_obj(eloop::future_cancelled(recv))),
        MethodKind::FutException => eloop::future_exception(recv),
        MethodKind::FutResult => eloop::future_result(recv),
        MethodKind::FutCancel => Ok(bool_obj(eloop::future_cancel(recv))),
        MethodKind::FutAddDoneCallback => {
            eloop::future_add_done_callback(recv, one_arg(args)?);
            incref(s.none);
            Ok(s.none)
        }
        MethodKind::MapItems => mapping_items_list(recv),
    }
}

fn bool_obj(value: bool) -> RawObjectPtr {
    let s = sing();
    let ptr = if value { s.true_obj } else { s.false_obj };
    incref(ptr);
    ptr
}

// ============================================================================
// Generators
// ============================================================================

pub(crate) fn gen_send(generator: RawObjectPtr, sent: RawObjectPtr) -> Result<RawObjectPtr, ()> {
    let s = sing();
    let state = match &unsafe { obj(generator) }.value {
        Value::Generator(state) => state,
        _ => {
            errors::raise(s.exc_type_error, "send() requires a generator");
            return Err(());
        }
    };
    let mut state = state.lock();
    if state.closed || state.finished {
        incref(s.none);
        errors::raise_stop(s.none);
        return Err(());
    }
    if let Some((at, message)) = &state.fail_at {
        if *at == state.pos {
            let message = message.clone();
            state.finished = true;
            errors::raise_with_frames(
                s.exc_value_error,
                message,
                vec![
                    "  File \"worker.py\", line 14, in produce\n".to_string(),
                    "    raise ValueError(reason)\n".to_string(),
                ],
            );
            return Err(());
        }
    }
    if state.pos < state.yields.len() {
        let out = if state.echo && sent != s.none && state.pos > 0 {
            incref(sent);
            sent
        } else {
            let scripted = state.yields[state.pos];
            incref(scripted);
            scripted
        };
        state.pos += 1;
        Ok(out)
    } else {
        state.finished = true;
        incref(state.terminal);
        errors::raise_stop(state.terminal);
        Err(())
    }
}

fn gen_close(generator: RawObjectPtr) -> Result<RawObjectPtr, ()> {
    let s = sing();
    if let Value::Generator(state) = &unsafe { obj(generator) }.value {
        let mut state = state.lock();
        state.closed = true;
    }
    incref(s.none);
    Ok(s.none)
}

/// Whether `close()` was called, for cleanup assertions.
pub fn generator_closed(generator: RawObjectPtr) -> bool {
    match &unsafe { obj(generator) }.value {
        Value::Generator(state) => state.lock().closed,
        _ => false,
    }
}

// ============================================================================
// Async generators
// ============================================================================

fn step_awaitable(countdown: u32, outcome: CoroOutcome) -> RawObjectPtr {
    alloc(Value::Coroutine(parking_lot::Mutex::new(CoroPlan {
        countdown,
        outcome,
        consumed: false,
    })))
}

/// One `__anext__` pull: a fresh awaitable resolving to the next item, or
/// raising the async stop signal once the script runs out.
fn anext_step(agen: RawObjectPtr) -> Result<RawObjectPtr, ()> {
    let s = sing();
    let state = match &unsafe { obj(agen) }.value {
        Value::AsyncGenerator(state) => state,
        _ => {
            errors::raise(s.exc_type_error, "__anext__() requires an async generator");
            return Err(());
        }
    };
    let mut state = state.lock();
    if let Some((at, message)) = &state.fail_at {
        if *at == state.pos {
            let message = message.clone();
            state.fail_at = None;
            // A failed pull finishes the stream; later pulls stop.
            let pos = state.pos;
            let remaining = state.items.split_off(pos);
            for item in remaining {
                decref(item);
            }
            return Ok(step_awaitable(
                0,
                CoroOutcome::Error {
                    ty: s.exc_value_error,
                    message,
                },
            ));
        }
    }
    if state.pos < state.items.len() {
        // Ownership of the item moves into the awaitable.
        let item = state.items[state.pos];
        state.pos += 1;
        Ok(step_awaitable(1, CoroOutcome::Value(item)))
    } else {
        Ok(step_awaitable(
            0,
            CoroOutcome::Error {
                ty: s.exc_stop_async_iteration,
                message: String::new(),
            },
        ))
    }
}

// ============================================================================
// traceback module
// ============================================================================

fn format_tb(traceback: RawObjectPtr) -> Result<RawObjectPtr, ()> {
    let frames = match &unsafe { obj(traceback) }.value {
        Value::Traceback { frames } => frames.clone(),
        _ => {
            errors::raise(sing().exc_type_error, "format_tb() requires a traceback");
            return Err(());
        }
    };
    let items = frames
        .into_iter()
        .map(crate::object::new_str)
        .collect::<Vec<_>>();
    Ok(alloc(Value::List(parking_lot::Mutex::new(items))))
}

// ============================================================================
// Mappings
// ============================================================================

fn mapping_items_list(target: RawObjectPtr) -> Result<RawObjectPtr, ()> {
    let pairs: Vec<(RawObjectPtr, RawObjectPtr)> = match &unsafe { obj(target) }.value {
        Value::Dict(entries) => entries.lock().clone(),
        Value::MappingProxy { pairs } => pairs.clone(),
        _ => {
            errors::raise(sing().exc_type_error, "items() requires a mapping");
            return Err(());
        }
    };
    let tuples = pairs
        .into_iter()
        .map(|(key, value)| {
            incref(key);
            incref(value);
            alloc(Value::Tuple(parking_lot::Mutex::new(vec![key, value])))
        })
        .collect::<Vec<_>>();
    Ok(alloc(Value::List(parking_lot::Mutex::new(tuples))))
}

// ============================================================================
// Rendering and comparison
// ============================================================================

/// `str()` form of any double object.
pub(crate) fn render(target: RawObjectPtr) -> String {
    match &unsafe { obj(target) }.value {
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => format!("{value:?}"),
        Value::Str { text, .. } => text.clone(),
        Value::Bytes(data) => format!("b'<{} bytes>'", data.len()),
        Value::List(items) => format!("<list of {}>", items.lock().len()),
        Value::Tuple(items) => format!("<tuple of {}>", items.lock().len()),
        Value::Dict(entries) => format!("<dict of {}>", entries.lock().len()),
        Value::Type(kind) => format!("<class '{}'>", kind.name()),
        Value::Exception(data) => data.message.clone(),
        _ => format!("<{} object>", type_name(target)),
    }
}

fn as_f64(target: RawObjectPtr) -> Option<f64> {
    match &unsafe { obj(target) }.value {
        Value::Int(value) => Some(*value as f64),
        Value::Float(value) => Some(*value),
        Value::Bool(value) => Some(f64::from(u8::from(*value))),
        _ => None,
    }
}

/// Rich comparison; ops follow the native numbering (lt 0, le 1, eq 2,
/// ne 3, gt 4, ge 5).
pub(crate) fn compare(a: RawObjectPtr, b: RawObjectPtr, op: i32) -> Result<bool, ()> {
    use std::cmp::Ordering;
    if op == 2 {
        return Ok(crate::object::value_eq(a, b));
    }
    if op == 3 {
        return Ok(!crate::object::value_eq(a, b));
    }
    let ordering = match (&unsafe { obj(a) }.value, &unsafe { obj(b) }.value) {
        (Value::Str { text: x, .. }, Value::Str { text: y, .. }) => Some(x.cmp(y)),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        errors::raise(
            sing().exc_type_error,
            format!(
                "'{}' not supported between '{}' and '{}'",
                op_symbol(op),
                type_name(a),
                type_name(b)
            ),
        );
        return Err(());
    };
    Ok(match op {
        0 => ordering == Ordering::Less,
        1 => ordering != Ordering::Greater,
        4 => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

fn op_symbol(op: i32) -> &'static str {
    match op {
        0 => "<",
        1 => "<=",
        4 => ">",
        5 => ">=",
        _ => "==",
    }
}

pub(crate) fn truthy(target: RawObjectPtr) -> bool {
    match &unsafe { obj(target) }.value {
        Value::None => false,
        Value::Bool(value) => *value,
        Value::Int(value) => *value != 0,
        Value::Float(value) => *value != 0.0,
        Value::Str { text, .. } => !text.is_empty(),
        Value::Bytes(data) => !data.is_empty(),
        Value::List(items) => !items.lock().is_empty(),
        Value::Tuple(items) => !items.lock().is_empty(),
        Value::Dict(entries) => !entries.lock().is_empty(),
        _ => true,
    }
}
