extern crate chrono;
extern crate derivative;
extern crate lazy_static;
extern crate reqwest;
extern crate serde_derive;
extern crate uuid;

#[macro_use]
extern crate log;

#[macro_use]
extern crate derive_builder;

pub mod app;
pub mod configuration;
pub mod connection;
pub mod reporter;
pub mod sequences;
pub mod time;
