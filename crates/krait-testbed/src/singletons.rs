//! Immortal singletons and type objects.
//!
//! Built once, leaked for the process lifetime, and wired into the data
//! slots of the table. Address identity is the contract: `none` here is
//! the pointer every `None` check compares against.

use std::sync::OnceLock;

use krait_abi::RawObjectPtr;

use crate::object::{alloc_immortal, obj, TypeKind, Value};

pub(crate) struct Singletons {
    pub none: RawObjectPtr,
    pub true_obj: RawObjectPtr,
    pub false_obj: RawObjectPtr,

    pub type_none: RawObjectPtr,
    pub type_bool: RawObjectPtr,
    pub type_int: RawObjectPtr,
    pub type_float: RawObjectPtr,
    pub type_str: RawObjectPtr,
    pub type_bytes: RawObjectPtr,
    pub type_list: RawObjectPtr,
    pub type_tuple: RawObjectPtr,
    pub type_dict: RawObjectPtr,
    pub type_generator: RawObjectPtr,
    pub type_async_generator: RawObjectPtr,
    pub type_coroutine: RawObjectPtr,
    pub type_module: RawObjectPtr,
    pub type_traceback: RawObjectPtr,
    pub type_builtin: RawObjectPtr,
    pub type_future: RawObjectPtr,
    pub type_event_loop: RawObjectPtr,
    pub type_iterator: RawObjectPtr,
    pub type_mapping_proxy: RawObjectPtr,
    pub type_buffer: RawObjectPtr,

    pub exc_stop_iteration: RawObjectPtr,
    pub exc_stop_async_iteration: RawObjectPtr,
    pub exc_value_error: RawObjectPtr,
    pub exc_type_error: RawObjectPtr,
    pub exc_attribute_error: RawObjectPtr,
    pub exc_runtime_error: RawObjectPtr,
    pub exc_cancelled_error: RawObjectPtr,
}

unsafe impl Send for Singletons {}
unsafe impl Sync for Singletons {}

static SINGLETONS: OnceLock<Singletons> = OnceLock::new();

pub(crate) fn sing() -> &'static Singletons {
    SINGLETONS.get_or_init(|| Singletons {
        none: alloc_immortal(Value::None),
        true_obj: alloc_immortal(Value::Bool(true)),
        false_obj: alloc_immortal(Value::Bool(false)),

        type_none: alloc_immortal(Value::Type(TypeKind::NoneType)),
        type_bool: alloc_immortal(Value::Type(TypeKind::Bool)),
        type_int: alloc_immortal(Value::Type(TypeKind::Int)),
        type_float: alloc_immortal(Value::Type(TypeKind::Float)),
        type_str: alloc_immortal(Value::Type(TypeKind::Str)),
        type_bytes: alloc_immortal(Value::Type(TypeKind::Bytes)),
        type_list: alloc_immortal(Value::Type(TypeKind::List)),
        type_tuple: alloc_immortal(Value::Type(TypeKind::Tuple)),
        type_dict: alloc_immortal(Value::Type(TypeKind::Dict)),
        type_generator: alloc_immortal(Value::Type(TypeKind::Generator)),
        type_async_generator: alloc_immortal(Value::Type(TypeKind::AsyncGenerator)),
        type_coroutine: alloc_immortal(Value::Type(TypeKind::Coroutine)),
        type_module: alloc_immortal(Value::Type(TypeKind::Module)),
        type_traceback: alloc_immortal(Value::Type(TypeKind::Traceback)),
        type_builtin: alloc_immortal(Value::Type(TypeKind::Builtin)),
        type_future: alloc_immortal(Value::Type(TypeKind::Future)),
        type_event_loop: alloc_immortal(Value::Type(TypeKind::EventLoop)),
        type_iterator: alloc_immortal(Value::Type(TypeKind::Iterator)),
        type_mapping_proxy: alloc_immortal(Value::Type(TypeKind::MappingProxy)),
        type_buffer: alloc_immortal(Value::Type(TypeKind::BufferExporter)),

        exc_stop_iteration: alloc_immortal(Value::Type(TypeKind::Exception("StopIteration"))),
        exc_stop_async_iteration: alloc_immortal(Value::Type(TypeKind::Exception(
            "StopAsyncIteration",
        ))),
        exc_value_error: alloc_immortal(Value::Type(TypeKind::Exception("ValueError"))),
        exc_type_error: alloc_immortal(Value::Type(TypeKind::Exception("TypeError"))),
        exc_attribute_error: alloc_immortal(Value::Type(TypeKind::Exception("AttributeError"))),
        exc_runtime_error: alloc_immortal(Value::Type(TypeKind::Exception("RuntimeError"))),
        exc_cancelled_error: alloc_immortal(Value::Type(TypeKind::Exception("CancelledError"))),
    })
}

/// The type object of any double object.
pub(crate) fn type_of(ptr: RawObjectPtr) -> RawObjectPtr {
    let s = sing();
    match &unsafe { obj(ptr) }.value {
        Value::None => s.type_none,
        Value::Bool(_) => s.type_bool,
        Value::Int(_) => s.type_int,
        Value::Float(_) => s.type_float,
        Value::Str { .. } => s.type_str,
        Value::Bytes(_) => s.type_bytes,
        Value::List(_) => s.type_list,
        Value::Tuple(_) => s.type_tuple,
        Value::Dict(_) => s.type_dict,
        Value::Type(_) => s.type_builtin,
        Value::Module { .. } => s.type_module,
        Value::Exception(data) => data.ty,
        Value::Traceback { .. } => s.type_traceback,
        Value::Generator(_) => s.type_generator,
        Value::AsyncGenerator(_) => s.type_async_generator,
        Value::Coroutine(_) => s.type_coroutine,
        Value::EventLoop(_) => s.type_event_loop,
        Value::Future(_) => s.type_future,
        Value::Iterator(_) => s.type_iterator,
        Value::MappingProxy { .. } => s.type_mapping_proxy,
        Value::BufferExporter(_) => s.type_buffer,
        Value::Builtin(_) => s.type_builtin,
    }
}
