//! Interface com Userspace.
//!
//! A fronteira é um trap com argumentos em registradores, despachado por
//! número através de uma tabela estática. Os handlers validam argumentos,
//! copiam buffers de/para o espaço do usuário através do vmmap e traduzem
//! `KResult` para o retorno negativo de errno.

pub mod abi;
pub mod dispatch;
pub mod fs;
pub mod memory;
pub mod numbers;
pub mod process;

pub use abi::SyscallArgs;
pub use dispatch::syscall_dispatch;
