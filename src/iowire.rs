use embedded_hal::digital::{Error, ErrorType, InputPin, OutputPin};

/// Single bidirectional line with an external pull-up
pub trait IoWire {
    type Error: Error;

    /// Pulls the line low
    fn drive_low(&mut self) -> Result<(), Self::Error>;

    /// Stops driving the line and lets the pull-up (or a device) decide its level
    fn release(&mut self) -> Result<(), Self::Error>;

    /// Samples the line level
    fn is_high(&mut self) -> Result<bool, Self::Error>;

    /// Samples the line level
    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Open-drain pin config wrapper
///
/// Setting an open-drain output high releases the line.
impl<IO> IoWire for (IO,)
where
    IO: ErrorType + OutputPin + InputPin,
{
    type Error = IO::Error;

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        self.0.set_low()
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.0.set_high()
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.0.is_high()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.0.is_low()
    }
}

/// Separate sense and drive lines wrapper
impl<E, I, O> IoWire for (I, O)
where
    E: Error,
    I: ErrorType<Error = E> + InputPin,
    O: ErrorType<Error = E> + OutputPin,
{
    type Error = E;

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        self.1.set_low()
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.1.set_high()
    }

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.0.is_high()
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.0.is_low()
    }
}
