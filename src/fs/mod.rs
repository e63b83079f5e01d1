//! Sistema de Arquivos.
//!
//! `vfs` define o namespace unificado (vnodes, files, resolução de caminho);
//! `s5fs` é o filesystem em disco que implementa as operações de vnode.

pub mod s5fs;
pub mod vfs;

#[cfg(test)]
pub mod tests;

use crate::sync::Spinlock;
use crate::sys::KResult;
use alloc::sync::Arc;
use vfs::{Filesystem, Vnode};

/// Raiz do namespace (vnode raiz do filesystem montado)
static VFS_ROOT: Spinlock<Option<Arc<Vnode>>> = Spinlock::new(None);

/// Vnode raiz, se houver filesystem montado. A referência devolvida é um
/// clone simples: quem for guardar deve dar `vref`.
pub fn vfs_root() -> Option<Arc<Vnode>> {
    VFS_ROOT.lock().clone()
}

/// Monta `fs` como raiz do namespace.
pub fn mount_root(fs: &Arc<dyn Filesystem>) -> KResult<()> {
    let root = vfs::vget(fs, fs.root_vno())?;
    log::info!("(VFS) raiz montada (inode {})", root.vno());
    *VFS_ROOT.lock() = Some(root);
    Ok(())
}

/// Zera a raiz montada (isolamento entre testes).
#[cfg(test)]
pub fn test_reset_root() {
    *VFS_ROOT.lock() = None;
}

/// Desmonta a raiz: solta o vnode raiz e sincroniza o filesystem.
pub fn umount_root() -> KResult<()> {
    let root = VFS_ROOT.lock().take();
    match root {
        Some(root) => {
            let fs = root.fs().clone();
            vfs::vput(root);
            fs.umount()
        }
        None => Ok(()),
    }
}
