//! Host scheduler seams used while waiting for a temperature conversion.

/// Free-running monotonic millisecond counter
///
/// The counter may wrap; elapsed time is computed with wrapping arithmetic.
pub trait Clock {
    fn now_ms(&mut self) -> u32;
}

/// Hands the processor to other tasks for a moment
pub trait Yield {
    fn yield_now(&mut self);
}

impl<F: FnMut()> Yield for F {
    fn yield_now(&mut self) {
        self()
    }
}

/// Milliseconds elapsed since `start`, tolerant to counter wrap-around
pub(crate) fn elapsed_ms(clock: &mut impl Clock, start: u32) -> u32 {
    clock.now_ms().wrapping_sub(start)
}
