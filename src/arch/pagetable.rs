//! Diretório de páginas (por processo).
//!
//! Mapeia números de página virtual (vpn) para endereços de frame. A
//! estrutura é compartilhável (`Clone` barato) porque o processo e os
//! contextos das suas threads apontam para o mesmo diretório.

use crate::sync::Spinlock;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};

bitflags! {
    /// Bits de uma entrada do diretório de páginas
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const EXECUTABLE = 1 << 3;
    }
}

/// Entrada instalada: endereço do frame + bits de acesso
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtEntry {
    pub paddr: usize,
    pub flags: PtFlags,
}

struct PageDirInner {
    id: u64,
    entries: Spinlock<BTreeMap<usize, PtEntry>>,
}

/// Diretório de páginas de um processo.
#[derive(Clone)]
pub struct PageDir {
    inner: Arc<PageDirInner>,
}

static NEXT_PAGEDIR_ID: AtomicU64 = AtomicU64::new(1);

impl PageDir {
    /// Cria um diretório vazio
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PageDirInner {
                id: NEXT_PAGEDIR_ID.fetch_add(1, Ordering::Relaxed),
                entries: Spinlock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Instala o mapeamento `vpn -> paddr` com os bits dados.
    pub fn pt_map(&self, vpn: usize, paddr: usize, flags: PtFlags) {
        self.inner
            .entries
            .lock()
            .insert(vpn, PtEntry { paddr, flags });
    }

    /// Remove o mapeamento de um vpn, se existir.
    pub fn pt_unmap(&self, vpn: usize) {
        self.inner.entries.lock().remove(&vpn);
    }

    /// Remove todos os mapeamentos em `[lo_vpn, hi_vpn)`.
    ///
    /// Usado pelo fork (forçar faults em ambos os lados) e pelo munmap.
    pub fn pt_unmap_range(&self, lo_vpn: usize, hi_vpn: usize) {
        let mut entries = self.inner.entries.lock();
        let in_range: alloc::vec::Vec<usize> = entries
            .range(lo_vpn..hi_vpn)
            .map(|(vpn, _)| *vpn)
            .collect();
        for vpn in in_range {
            entries.remove(&vpn);
        }
    }

    /// Consulta a entrada instalada para um vpn.
    pub fn pt_lookup(&self, vpn: usize) -> Option<PtEntry> {
        self.inner.entries.lock().get(&vpn).copied()
    }

    /// Número de páginas atualmente mapeadas
    pub fn mapped_count(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

impl Default for PageDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_lookup_unmap() {
        let pd = PageDir::new();
        pd.pt_map(10, 0xA000, PtFlags::PRESENT | PtFlags::WRITABLE);
        let e = pd.pt_lookup(10).unwrap();
        assert_eq!(e.paddr, 0xA000);
        assert!(e.flags.contains(PtFlags::WRITABLE));

        pd.pt_unmap(10);
        assert!(pd.pt_lookup(10).is_none());
    }

    #[test]
    fn test_unmap_range() {
        let pd = PageDir::new();
        for vpn in 0..8 {
            pd.pt_map(vpn, vpn << 12, PtFlags::PRESENT);
        }
        pd.pt_unmap_range(2, 6);
        assert_eq!(pd.mapped_count(), 4);
        assert!(pd.pt_lookup(2).is_none());
        assert!(pd.pt_lookup(5).is_none());
        assert!(pd.pt_lookup(6).is_some());
    }

    #[test]
    fn test_shared_between_clones() {
        let pd = PageDir::new();
        let pd2 = pd.clone();
        pd.pt_map(1, 0x1000, PtFlags::PRESENT);
        assert!(pd2.pt_lookup(1).is_some());
        assert_eq!(pd.id(), pd2.id());
    }
}
