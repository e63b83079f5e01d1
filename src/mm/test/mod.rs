//! Testes do subsistema de memória.

pub mod fork_test;
pub mod pframe_test;
pub mod shadow_test;
pub mod vmmap_test;
