// src/test/mod.rs
mod listener_test;
mod platform_test;
