//! Input seats, as far as the VT lifecycle is concerned

use crate::error::FbdevResult;

/// An input seat that can stop and resume delivering events.
pub trait InputSeat {
    fn name(&self) -> &str;

    fn enable(&mut self) -> FbdevResult<()>;

    fn disable(&mut self);
}

/// Device discovery context seats are created from.
pub trait InputDiscovery {
    fn create_seat(&mut self, name: &str) -> FbdevResult<Box<dyn InputSeat>>;
}
