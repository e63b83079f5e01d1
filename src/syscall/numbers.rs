//! Números de syscall (compatíveis com a numeração clássica do x86).

pub const SYS_EXIT: usize = 1;
pub const SYS_FORK: usize = 2;
pub const SYS_READ: usize = 3;
pub const SYS_WRITE: usize = 4;
pub const SYS_OPEN: usize = 5;
pub const SYS_CLOSE: usize = 6;
pub const SYS_WAITPID: usize = 7;
pub const SYS_LINK: usize = 9;
pub const SYS_UNLINK: usize = 10;
pub const SYS_EXEC: usize = 11;
pub const SYS_CHDIR: usize = 12;
pub const SYS_MKNOD: usize = 14;
pub const SYS_LSEEK: usize = 19;
pub const SYS_GETPID: usize = 20;
pub const SYS_KILL: usize = 37;
pub const SYS_RENAME: usize = 38;
pub const SYS_MKDIR: usize = 39;
pub const SYS_RMDIR: usize = 40;
pub const SYS_DUP: usize = 41;
pub const SYS_BRK: usize = 45;
pub const SYS_DUP2: usize = 63;
pub const SYS_MMAP: usize = 90;
pub const SYS_MUNMAP: usize = 91;
pub const SYS_STAT: usize = 106;
pub const SYS_GETDENT: usize = 141;
