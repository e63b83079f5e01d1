//! # Contratos de Arquitetura
//!
//! O núcleo não fala com o hardware diretamente: ele enxerga a arquitetura
//! através de três contratos estreitos:
//!
//! - troca de contexto (`context_setup` / `context_switch`);
//! - diretório de páginas (`PageDir`: `pt_map`, `pt_unmap_range`);
//! - invalidação de TLB (`tlb_flush`, `tlb_flush_range`, `tlb_flush_all`).
//!
//! Aqui o diretório de páginas é uma estrutura de software observável, o que
//! mantém o restante do kernel idêntico entre um alvo real (onde estas
//! funções viram assembly) e o ambiente de testes hospedado.

pub mod context;
pub mod pagetable;

pub use context::{context_make_active, context_setup, context_switch, Context, KStack};
pub use pagetable::{PageDir, PtFlags};

use core::sync::atomic::{AtomicU64, Ordering};

// Contadores de invalidação de TLB. Num alvo real viram `invlpg`/recarga de
// CR3; aqui ficam observáveis para os testes de fork/munmap.
static TLB_FLUSH_COUNT: AtomicU64 = AtomicU64::new(0);
static TLB_FLUSH_ALL_COUNT: AtomicU64 = AtomicU64::new(0);

/// Invalida a tradução de um único endereço virtual.
pub fn tlb_flush(_vaddr: usize) {
    TLB_FLUSH_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Invalida um intervalo `[lo, hi)` de páginas virtuais.
pub fn tlb_flush_range(lo_vpn: usize, hi_vpn: usize) {
    debug_assert!(lo_vpn <= hi_vpn);
    TLB_FLUSH_COUNT.fetch_add((hi_vpn - lo_vpn) as u64, Ordering::Relaxed);
}

/// Invalida todas as traduções do espaço atual.
pub fn tlb_flush_all() {
    TLB_FLUSH_ALL_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Total de `tlb_flush_all` desde o boot (visibilidade para testes)
pub fn tlb_flush_all_count() -> u64 {
    TLB_FLUSH_ALL_COUNT.load(Ordering::Relaxed)
}
