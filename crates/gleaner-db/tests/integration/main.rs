mod common;
mod record_tests;
