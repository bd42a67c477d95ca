//! Helper macros shared by the console and driver modules.

/// Generate debug formatting code for a [`SerialPort`](serialport::SerialPort)
/// like struct.
macro_rules! debug_fmt_serialport {
    ($port:ident, $f:ident) => {
        $f.debug_tuple("")
            .field(&$port.name())
            .field(&$port.baud_rate())
            .field(&$port.data_bits())
            .field(&$port.stop_bits())
            .field(&$port.parity())
            .field(&$port.flow_control())
    };
}

/// Generate a `DriverHandle` method giving scoped access to one capability
/// of the wrapped driver, refusing when the driver is inactive or does not
/// provide it.
macro_rules! capability_accessor {
    ($(#[$doc:meta])* $method:ident, $cast:ident, $capability:ident) => {
        $(#[$doc])*
        pub fn $method<R>(
            &self,
            f: impl FnOnce(&mut dyn $capability) -> Result<R>,
        ) -> Result<R> {
            if !self.is_active() {
                return Err(Error::NotActive(self.name().to_owned()));
            }
            let mut driver = self.borrow_driver()?;
            match driver.$cast() {
                Some(capability) => f(capability),
                None => Err(Error::Binding(format!(
                    "driver `{}` does not implement {}",
                    self.name(),
                    stringify!($capability)
                ))),
            }
        }
    };
}
