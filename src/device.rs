// -*- indent-tabs-mode: nil; tab-width: 2; -*-
// vim: set ts=&2 sw=2 et ai :

//! Device drivers.

pub mod null;
pub mod loopback;
pub mod tap;

pub use null::Null;
pub use loopback::Loopback;
pub use tap::TapDriver;
