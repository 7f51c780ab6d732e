//! Event Factory Implementation
//!
//! Slots are created exactly once, when their storage is allocated, and are then
//! mutated in place for the lifetime of the buffer. An `EventFactory` is the hook
//! that builds those initial values; the ring buffer calls it once per slot and
//! the unbounded buffer once per slot of every freshly allocated chunk.

use std::cell::UnsafeCell;

/// Factory for pre-populating slots
///
/// Any `Fn() -> T + Send + Sync` closure is a factory.
///
/// # Examples
/// ```
/// use ringgate::disruptor::EventFactory;
///
/// struct Tick {
///     price: i64,
/// }
///
/// let factory = || Tick { price: 0 };
/// assert_eq!(factory.new_instance().price, 0);
/// ```
pub trait EventFactory<T>: Send + Sync {
    /// Create a new slot value in its initial state
    fn new_instance(&self) -> T;
}

impl<T, F> EventFactory<T> for F
where
    F: Fn() -> T + Send + Sync,
{
    fn new_instance(&self) -> T {
        self()
    }
}

/// Event factory that uses the Default trait
pub struct DefaultEventFactory<T: Default> {
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T: Default> DefaultEventFactory<T> {
    /// Create a new default event factory
    pub fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: Default> Default for DefaultEventFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> EventFactory<T> for DefaultEventFactory<T> {
    fn new_instance(&self) -> T {
        T::default()
    }
}

/// Allocate `len` slots, each initialised by `factory`
pub(crate) fn populate_slots<T, F>(factory: &F, len: usize) -> Box<[UnsafeCell<T>]>
where
    F: EventFactory<T> + ?Sized,
{
    (0..len)
        .map(|_| UnsafeCell::new(factory.new_instance()))
        .collect()
}
