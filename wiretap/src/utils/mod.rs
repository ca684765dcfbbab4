mod sleep_handle;

pub use sleep_handle::*;
