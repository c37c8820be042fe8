#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod pipeline;
pub mod report;

#[path = "../data/mod.rs"]
pub mod data;

#[path = "../regress/mod.rs"]
pub mod regress;

#[path = "../map/mod.rs"]
pub mod map;
