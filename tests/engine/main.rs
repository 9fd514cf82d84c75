#[path = "../common/mod.rs"]
mod common;

mod checkpoint;
mod failures;
mod lifecycle;
