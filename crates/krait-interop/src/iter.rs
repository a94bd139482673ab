//! Iterator Bridge
//!
//! [`PyGenerator`] drives a runtime generator from the host: advance,
//! send a value in, observe the current yield, and read the terminal
//! value the generator returned. The runtime's stop signal is folded
//! into the bridge state instead of surfacing as an error.
//!
//! [`ValueIter`] is the plain pull-iterator over any iterable, for the
//! common case where nothing is sent back in.

use std::marker::PhantomData;

use tracing::debug;

use crate::convert::{cast_error, FromPy, PyShaped, Shape, ToPy};
use crate::error::{InteropError, InteropResult};
use crate::except;
use crate::gil::GilGuard;
use crate::handle::Handle;
use crate::runtime::Runtime;

/// Where a [`PyGenerator`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Constructed, not yet advanced.
    Created,
    /// At least one yield observed; resumable.
    Active,
    /// The generator returned; the terminal value is available.
    Exhausted,
    /// A resume step failed; the generator is not resumable.
    Failed,
    /// Explicitly closed.
    Closed,
}

/// Host-side driver for a runtime generator.
///
/// `Y` is the yield type, `S` the type sent in on resume, `R` the
/// terminal return type.
#[derive(Debug)]
pub struct PyGenerator<Y, S, R> {
    generator: Handle,
    send_method: Handle,
    close_method: Handle,
    current: Option<Y>,
    return_value: Option<R>,
    state: IteratorState,
    _marker: PhantomData<fn(S) -> (Y, R)>,
}

impl<Y, S, R> PyGenerator<Y, S, R>
where
    Y: FromPy,
    S: ToPy,
    R: FromPy,
{
    /// Wrap a generator object, resolving its resume and close methods up
    /// front.
    pub fn new(generator: Handle) -> InteropResult<Self> {
        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        let is_generator = generator.is_instance_of(&py, py.api().gen_type)
            || (generator.hasattr(&py, "send")? && generator.hasattr(&py, "close")?);
        if !is_generator {
            return Err(cast_error(&Shape::Iterator, &generator, &py));
        }
        let send_method = generator.getattr(&py, "send")?;
        let close_method = generator.getattr(&py, "close")?;
        Ok(PyGenerator {
            generator,
            send_method,
            close_method,
            current: None,
            return_value: None,
            state: IteratorState::Created,
            _marker: PhantomData,
        })
    }

    /// Resume the generator without sending a value.
    ///
    /// Returns `true` if a new yield is available in [`current`], `false`
    /// once the generator has returned. Calling again after exhaustion is
    /// a no-op returning `false`.
    ///
    /// [`current`]: PyGenerator::current
    pub fn advance(&mut self) -> InteropResult<bool> {
        self.step(|py| Ok(Handle::none(py)))
    }

    /// Resume the generator, sending `value` to the suspended yield.
    ///
    /// Sending into a just-created generator is the runtime's error to
    /// raise; it comes back projected, not masked.
    pub fn send(&mut self, value: &S) -> InteropResult<bool> {
        self.step(|py| value.to_py(py))
    }

    fn step(
        &mut self,
        arg: impl FnOnce(&GilGuard<'_>) -> InteropResult<Handle>,
    ) -> InteropResult<bool> {
        match self.state {
            IteratorState::Exhausted => return Ok(false),
            IteratorState::Failed => {
                return Err(InteropError::disposed("failed generator"));
            }
            IteratorState::Closed => {
                return Err(InteropError::disposed("closed generator"));
            }
            IteratorState::Created | IteratorState::Active => {}
        }

        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        let arg = arg(&py)?;
        match self.send_method.call(&py, &[&arg]) {
            Ok(item) => match Y::from_py(&item, &py) {
                Ok(value) => {
                    self.current = Some(value);
                    self.state = IteratorState::Active;
                    Ok(true)
                }
                Err(err) => {
                    self.current = None;
                    self.state = IteratorState::Failed;
                    Err(err)
                }
            },
            Err(InteropError::StopIteration { value }) => match R::from_py(&value, &py) {
                Ok(terminal) => {
                    self.return_value = Some(terminal);
                    self.current = None;
                    self.state = IteratorState::Exhausted;
                    Ok(false)
                }
                Err(err) => {
                    self.current = None;
                    self.state = IteratorState::Failed;
                    Err(err)
                }
            },
            Err(err) => {
                self.current = None;
                self.state = IteratorState::Failed;
                Err(err)
            }
        }
    }

    /// The most recent yield, if the generator is suspended at one.
    pub fn current(&self) -> Option<&Y> {
        self.current.as_ref()
    }

    /// Take the most recent yield out of the bridge.
    pub fn take_current(&mut self) -> Option<Y> {
        self.current.take()
    }

    /// The terminal value, available once exhausted.
    pub fn return_value(&self) -> Option<&R> {
        self.return_value.as_ref()
    }

    /// Lifecycle state.
    pub fn state(&self) -> IteratorState {
        self.state
    }

    /// Close the generator, running its cleanup. Idempotent; exhaustion
    /// state and any terminal value are preserved.
    pub fn close(&mut self) -> InteropResult<()> {
        if matches!(self.state, IteratorState::Closed) {
            return Ok(());
        }
        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        self.close_method.call0(&py)?;
        self.current = None;
        self.state = IteratorState::Closed;
        Ok(())
    }

    /// The wrapped generator object.
    pub fn as_handle(&self) -> &Handle {
        &self.generator
    }
}

impl<Y, S, R> Drop for PyGenerator<Y, S, R> {
    fn drop(&mut self) {
        if matches!(
            self.state,
            IteratorState::Closed | IteratorState::Exhausted | IteratorState::Failed
        ) {
            return;
        }
        // Best-effort cleanup of a still-suspended generator.
        if let Some(runtime) = Runtime::try_global() {
            let py = runtime.acquire();
            if self.close_method.call0(&py).is_err() {
                debug!("generator close failed during drop");
                unsafe { (py.api().err_clear)() };
            }
        }
    }
}

impl<Y, S, R> PyShaped for PyGenerator<Y, S, R> {
    fn shape() -> Shape {
        Shape::Iterator
    }
}

impl<Y, S, R> FromPy for PyGenerator<Y, S, R>
where
    Y: FromPy,
    S: ToPy,
    R: FromPy,
{
    fn from_py(obj: &Handle, py: &GilGuard<'_>) -> InteropResult<Self> {
        PyGenerator::new(obj.clone_ref(py)?)
    }
}

// ============================================================================
// Plain iteration
// ============================================================================

/// A pull iterator over any runtime iterable, decoding each item as `T`.
pub struct ValueIter<T> {
    iterator: Handle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromPy> ValueIter<T> {
    /// Ask `iterable` for an iterator.
    pub fn new(iterable: &Handle) -> InteropResult<Self> {
        let runtime = Runtime::global()?;
        let py = runtime.acquire();
        Ok(ValueIter {
            iterator: iterable.get_iter(&py)?,
            _marker: PhantomData,
        })
    }
}

impl<T: FromPy> Iterator for ValueIter<T> {
    type Item = InteropResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let runtime = match Runtime::global() {
            Ok(runtime) => runtime,
            Err(err) => return Some(Err(err)),
        };
        let py = runtime.acquire();
        let raw = unsafe { (py.api().iter_next)(self.iterator.as_ptr()) };
        if raw.is_null() {
            // Null without a pending error is plain exhaustion.
            if unsafe { (py.api().err_occurred)().is_null() } {
                return None;
            }
            return Some(Err(except::take_pending(&py, "iteration")));
        }
        let item = match unsafe { Handle::from_new_reference(&py, raw) } {
            Ok(item) => item,
            Err(err) => return Some(Err(err)),
        };
        Some(T::from_py(&item, &py))
    }
}
