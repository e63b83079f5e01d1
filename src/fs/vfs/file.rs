//! Arquivos abertos e tabela de file descriptors.
//!
//! Um `File` é a posição de leitura compartilhada entre descritores (dup
//! produz outro fd apontando para o mesmo `File`). A tabela de fds é um
//! vetor fixo por processo; `fget`/`fput` gerem a contagem de referências,
//! e o file com contagem zero também solta o vnode.

use crate::fs::vfs::{vput, Vnode};
use crate::proc::Process;
use crate::sync::Spinlock;
use crate::sys::{Errno, KResult, NFILES};
use alloc::sync::Arc;
use bitflags::bitflags;
use core::sync::atomic::{AtomicUsize, Ordering};

// Flags de open(2)
pub const O_RDONLY: u32 = 0;
pub const O_WRONLY: u32 = 1;
pub const O_RDWR: u32 = 2;
pub const O_CREAT: u32 = 0x100;
pub const O_APPEND: u32 = 0x200;

// whence de lseek(2)
pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

bitflags! {
    /// Modo de um arquivo aberto
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const APPEND = 1 << 2;
    }
}

/// Arquivo aberto.
pub struct File {
    /// Posição corrente (compartilhada entre descritores dup-ados)
    pos: Spinlock<usize>,
    mode: FileMode,
    vnode: Arc<Vnode>,
    refcount: AtomicUsize,
}

impl File {
    /// Cria um arquivo aberto; assume a referência que o chamador tem sobre
    /// o vnode. Contagem inicial 1.
    pub fn new(vnode: Arc<Vnode>, mode: FileMode) -> Arc<File> {
        Arc::new(File {
            pos: Spinlock::new(0),
            mode,
            vnode,
            refcount: AtomicUsize::new(1),
        })
    }

    pub fn vnode(&self) -> &Arc<Vnode> {
        &self.vnode
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn pos(&self) -> usize {
        *self.pos.lock()
    }

    pub fn set_pos(&self, pos: usize) {
        *self.pos.lock() = pos;
    }

    pub fn advance(&self, n: usize) {
        *self.pos.lock() += n;
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

/// Incrementa a contagem de um file (dup, fork, fget).
pub fn fref(f: &Arc<File>) {
    let old = f.refcount.fetch_add(1, Ordering::AcqRel);
    debug_assert!(old > 0);
}

/// Busca o file de um fd, com a contagem incrementada.
pub fn fget(proc: &Arc<Process>, fd: i32) -> Option<Arc<File>> {
    if fd < 0 || fd as usize >= NFILES {
        return None;
    }
    let files = proc.files.lock();
    let f = files[fd as usize].as_ref()?;
    fref(f);
    Some(f.clone())
}

/// Solta uma referência; o último put também solta o vnode.
pub fn fput(f: Arc<File>) {
    let old = f.refcount.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(old > 0, "fput sem referência");
    if old == 1 {
        vput(f.vnode.clone());
    }
}

/// Primeiro índice livre da tabela de fds.
pub fn get_empty_fd(proc: &Arc<Process>) -> KResult<usize> {
    let files = proc.files.lock();
    files
        .iter()
        .position(|f| f.is_none())
        .ok_or(Errno::EMFILE)
}
