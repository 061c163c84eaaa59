#![forbid(unsafe_code)]

pub mod access;
pub mod api;
pub mod health;
pub mod identity;
pub mod quota;
pub mod registry;
pub mod store;
pub mod token;

#[cfg(test)]
mod access_tests;
#[cfg(test)]
mod api_tests;
