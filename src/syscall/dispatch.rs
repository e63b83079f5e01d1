//! # Tabela de Syscalls
//!
//! Tabela estática de handlers indexada por número. None = não
//! implementada (ENOSYS).

use super::abi::SyscallArgs;
use super::numbers::*;
use crate::sys::{error::result_to_isize, Errno, KResult};

/// Tipo de handler de syscall
pub type SyscallHandler = fn(&SyscallArgs) -> KResult<usize>;

/// Tamanho da tabela (256 syscalls possíveis)
pub const TABLE_SIZE: usize = 256;

/// Tabela de syscalls
pub static SYSCALL_TABLE: [Option<SyscallHandler>; TABLE_SIZE] = {
    let mut table: [Option<SyscallHandler>; TABLE_SIZE] = [None; TABLE_SIZE];

    // === PROCESSO ===
    table[SYS_EXIT] = Some(super::process::sys_exit);
    table[SYS_FORK] = Some(super::process::sys_fork);
    table[SYS_WAITPID] = Some(super::process::sys_waitpid);
    table[SYS_GETPID] = Some(super::process::sys_getpid);
    table[SYS_KILL] = Some(super::process::sys_kill);
    table[SYS_EXEC] = Some(super::process::sys_exec);

    // === MEMÓRIA ===
    table[SYS_MMAP] = Some(super::memory::sys_mmap);
    table[SYS_MUNMAP] = Some(super::memory::sys_munmap);
    table[SYS_BRK] = Some(super::memory::sys_brk);

    // === FILESYSTEM ===
    table[SYS_OPEN] = Some(super::fs::sys_open);
    table[SYS_CLOSE] = Some(super::fs::sys_close);
    table[SYS_READ] = Some(super::fs::sys_read);
    table[SYS_WRITE] = Some(super::fs::sys_write);
    table[SYS_LSEEK] = Some(super::fs::sys_lseek);
    table[SYS_DUP] = Some(super::fs::sys_dup);
    table[SYS_DUP2] = Some(super::fs::sys_dup2);
    table[SYS_MKDIR] = Some(super::fs::sys_mkdir);
    table[SYS_RMDIR] = Some(super::fs::sys_rmdir);
    table[SYS_MKNOD] = Some(super::fs::sys_mknod);
    table[SYS_LINK] = Some(super::fs::sys_link);
    table[SYS_UNLINK] = Some(super::fs::sys_unlink);
    table[SYS_RENAME] = Some(super::fs::sys_rename);
    table[SYS_CHDIR] = Some(super::fs::sys_chdir);
    table[SYS_STAT] = Some(super::fs::sys_stat);
    table[SYS_GETDENT] = Some(super::fs::sys_getdent);

    table
};

/// Ponto de entrada do trap de syscall: despacha pelo número e traduz o
/// resultado para o valor de retorno (negativo = errno).
pub fn syscall_dispatch(num: usize, args: SyscallArgs) -> isize {
    let handler = SYSCALL_TABLE.get(num).copied().flatten();
    match handler {
        Some(h) => result_to_isize(h(&args)),
        None => {
            log::warn!("(Syscall) número desconhecido {}", num);
            Errno::ENOSYS.as_isize()
        }
    }
}
