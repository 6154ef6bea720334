//! Logging.
//!
//! With the `defmt` feature these forward to defmt.  Otherwise they vanish,
//! while still evaluating their arguments so nothing becomes unused.

#![allow(unused_macros)]

#[cfg(feature = "defmt")]
macro_rules! trace {
    ($($t:tt)*) => { ::defmt::trace!($($t)*) };
}

#[cfg(feature = "defmt")]
macro_rules! debug {
    ($($t:tt)*) => { ::defmt::debug!($($t)*) };
}

#[cfg(feature = "defmt")]
macro_rules! info {
    ($($t:tt)*) => { ::defmt::info!($($t)*) };
}

#[cfg(feature = "defmt")]
macro_rules! warn {
    ($($t:tt)*) => { ::defmt::warn!($($t)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! trace {
    ($fmt:literal $(, $e:expr)* $(,)?) => { { $( let _ = &$e; )* } };
}

#[cfg(not(feature = "defmt"))]
macro_rules! debug {
    ($fmt:literal $(, $e:expr)* $(,)?) => { { $( let _ = &$e; )* } };
}

#[cfg(not(feature = "defmt"))]
macro_rules! info {
    ($fmt:literal $(, $e:expr)* $(,)?) => { { $( let _ = &$e; )* } };
}

#[cfg(not(feature = "defmt"))]
macro_rules! warn {
    ($fmt:literal $(, $e:expr)* $(,)?) => { { $( let _ = &$e; )* } };
}
