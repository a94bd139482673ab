use krait_interop::{Handle, Runtime};

/// Install the in-process runtime double once per test binary.
pub fn runtime() -> &'static Runtime {
    match Runtime::initialize_with_api(krait_testbed::native_api()) {
        Ok(runtime) => runtime,
        Err(_) => Runtime::global().expect("runtime should be installed"),
    }
}

/// Wrap an owned pointer from the double as a handle.
pub fn own(py: &krait_interop::GilGuard<'_>, ptr: *mut krait_abi::RawObject) -> Handle {
    unsafe { Handle::from_new_reference(py, ptr) }.expect("scripted object")
}
