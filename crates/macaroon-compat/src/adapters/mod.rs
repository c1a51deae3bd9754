//! Bridged adapters, one per target library.

pub mod jsmacaroon;
pub mod libmacaroons;
pub mod pymacaroons;

#[cfg(test)]
pub(crate) mod testing;

pub use jsmacaroon::JsMacaroonPackage;
pub use libmacaroons::LibMacaroonsPackage;
pub use pymacaroons::PyMacaroonsPackage;
