//! Integration tests for the plugval crates live in `tests/`.
