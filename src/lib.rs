//! Cinder Kernel Library.
//!
//! Ponto central de exportação dos módulos do kernel.
//! Define a estrutura hierárquica do núcleo: processos, memória virtual
//! (paginação por demanda + copy-on-write) e sistema de arquivos (VFS + S5FS).
//!
//! O agendamento é cooperativo e single-CPU: uma thread de kernel roda até
//! ceder a CPU voluntariamente ou bloquear em um canal de espera.

#![cfg_attr(not(test), no_std)]

// Habilitar alocação dinâmica (necessário para Vec/Box/Arc)
extern crate alloc;

// --- Módulos de Baixo Nível (Contratos de Hardware) ---
pub mod arch; // Contextos, diretório de páginas, TLB
pub mod drivers; // Dispositivos de bloco e de caractere

// --- Módulos Centrais (Lógica do Kernel) ---
pub mod mm; // Gerenciamento de Memória (pframe, mmobj, vmmap, fault)
pub mod proc; // Processos e threads de kernel
pub mod sched; // Scheduler cooperativo e canais de espera
pub mod sync; // Primitivas de Sincronização (Spinlock, KMutex)
pub mod sys; // Definições de Sistema (tipos, Errno)

// --- Subsistemas Avançados ---
pub mod fs; // Sistema de Arquivos Virtual (VFS) + S5FS
pub mod syscall; // Interface com Userspace

// --- Inicialização ---
pub mod init;
