//! Primitivas de Sincronização.
//!
//! Dois níveis, como de costume em kernels cooperativos:
//!
//! - `Spinlock`: exclusão curta, nunca dorme (busy-wait). É o `spin::Mutex`.
//! - `KMutex`: exclusão longa, PODE dormir (integra com o scheduler).
//!
//! Use `Spinlock` para proteger estruturas por alguns acessos; use `KMutex`
//! em torno de qualquer seção que possa bloquear no pipeline de pframes.

pub mod kmutex;

pub use kmutex::{KMutex, KMutexGuard};

/// Lock de exclusão curta (busy-wait)
pub type Spinlock<T> = spin::Mutex<T>;
