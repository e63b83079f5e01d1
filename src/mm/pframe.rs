//! # Cache de Page Frames
//!
//! Associa `(objeto de memória, número de página)` a uma página de memória
//! física, com os metadados dirty e pin. Invariantes:
//!
//! - para qualquer par `(obj, pagenum)` existe no máximo um frame residente;
//! - dois `pframe_get` com a mesma chave devolvem o mesmo frame;
//! - no máximo um preenchimento em andamento por chave (quem chegar durante
//!   o fill dorme no canal do frame e tenta de novo);
//! - um frame só é liberado com pin zero.

use crate::mm::mmobj::{self, MemObj};
use crate::mm::PAGE_SIZE;
use crate::sched::WaitQueue;
use crate::sync::Spinlock;
use crate::sys::KResult;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Chave de um frame no cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheKey {
    pub obj_id: u64,
    pub pagenum: usize,
}

/// Page frame: uma página física ligada a `(obj, pagenum)`.
pub struct Pframe {
    obj: Arc<MemObj>,
    pagenum: usize,
    data: Spinlock<Box<[u8]>>,
    dirty: AtomicBool,
    /// Preenchimento em andamento
    busy: AtomicBool,
    pincount: AtomicUsize,
    /// Threads aguardando o fim do fill
    waiters: WaitQueue,
}

impl Pframe {
    fn new(obj: Arc<MemObj>, pagenum: usize) -> Self {
        Self {
            obj,
            pagenum,
            data: Spinlock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            dirty: AtomicBool::new(false),
            busy: AtomicBool::new(true),
            pincount: AtomicUsize::new(0),
            waiters: WaitQueue::new(),
        }
    }

    pub fn obj(&self) -> &Arc<MemObj> {
        &self.obj
    }

    pub fn pagenum(&self) -> usize {
        self.pagenum
    }

    /// "Endereço físico" do frame (endereço da página na forma hospedada)
    pub fn paddr(&self) -> usize {
        self.data.lock().as_ptr() as usize
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn pincount(&self) -> usize {
        self.pincount.load(Ordering::Acquire)
    }

    pub fn pin(&self) {
        self.pincount.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let old = self.pincount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpin sem pin");
    }

    /// Acesso de leitura ao conteúdo da página
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }

    /// Acesso de escrita ao conteúdo da página (não marca dirty; use
    /// `pframe::dirty`)
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock())
    }

    pub fn zero(&self) {
        self.data.lock().fill(0);
    }

    pub fn copy_from(&self, src: &Pframe) {
        debug_assert!(!core::ptr::eq(self, src));
        let src_data = src.data.lock();
        self.data.lock().copy_from_slice(&src_data);
    }
}

/// Cache global de frames, indexado por `(obj_id, pagenum)`.
static FRAMES: Spinlock<BTreeMap<(u64, usize), Arc<Pframe>>> = Spinlock::new(BTreeMap::new());

/// Contadores do cache
#[derive(Debug, Clone, Copy, Default)]
pub struct PframeStats {
    pub hits: u64,
    pub misses: u64,
    pub fill_errors: u64,
}

static HITS: AtomicU64 = AtomicU64::new(0);
static MISSES: AtomicU64 = AtomicU64::new(0);
static FILL_ERRORS: AtomicU64 = AtomicU64::new(0);

pub fn stats() -> PframeStats {
    PframeStats {
        hits: HITS.load(Ordering::Relaxed),
        misses: MISSES.load(Ordering::Relaxed),
        fill_errors: FILL_ERRORS.load(Ordering::Relaxed),
    }
}

/// Resolve para um frame residente, alocando e preenchendo se necessário.
///
/// O preenchimento (`fillpage`) pode bloquear em I/O; o frame fica marcado
/// busy durante, e chamadas concorrentes para a mesma chave aguardam.
pub fn get(obj: &Arc<MemObj>, pagenum: usize) -> KResult<Arc<Pframe>> {
    let key = (obj.id(), pagenum);
    loop {
        let existing = FRAMES.lock().get(&key).cloned();
        if let Some(pf) = existing {
            if pf.is_busy() {
                // outra thread preenchendo: esperar e reavaliar
                pf.waiters.wait_on();
                continue;
            }
            HITS.fetch_add(1, Ordering::Relaxed);
            return Ok(pf);
        }

        MISSES.fetch_add(1, Ordering::Relaxed);
        let pf = Arc::new(Pframe::new(obj.clone(), pagenum));
        {
            let mut frames = FRAMES.lock();
            if frames.contains_key(&key) {
                // corrida perdida: outro alocou primeiro
                continue;
            }
            frames.insert(key, pf.clone());
        }
        obj.note_resident_inc();

        let res = mmobj::fillpage(obj, &pf);
        pf.busy.store(false, Ordering::Release);
        pf.waiters.wake_all();

        match res {
            Ok(()) => return Ok(pf),
            Err(e) => {
                log::error!(
                    "(Pframe) fillpage falhou para obj {} página {}: {:?}",
                    obj.id(),
                    pagenum,
                    e
                );
                FILL_ERRORS.fetch_add(1, Ordering::Relaxed);
                FRAMES.lock().remove(&key);
                obj.note_resident_dec();
                return Err(e);
            }
        }
    }
}

/// Como `get`, mas com a intenção de escrita explícita: shadows usam o
/// `forwrite` para disparar a cópia do COW.
pub fn lookup(obj: &Arc<MemObj>, pagenum: usize, forwrite: bool) -> KResult<Arc<Pframe>> {
    mmobj::lookuppage(obj, pagenum, forwrite)
}

/// Consulta não alocante: o frame residente, se houver (e não estiver busy).
pub fn get_resident(obj: &Arc<MemObj>, pagenum: usize) -> Option<Arc<Pframe>> {
    let pf = FRAMES.lock().get(&(obj.id(), pagenum)).cloned()?;
    if pf.is_busy() {
        return None;
    }
    Some(pf)
}

/// Marca o frame como sujo. O objeto pode exigir trabalho imediato
/// (alocação de bloco esparso no filesystem) — se falhar, o frame não fica
/// sujo e o erro sobe.
pub fn dirty(pf: &Arc<Pframe>) -> KResult<()> {
    mmobj::dirtypage(pf.obj(), pf)?;
    pf.dirty.store(true, Ordering::Release);
    Ok(())
}

/// Escreve de volta um frame sujo (pode bloquear em I/O de dispositivo).
pub fn clean(pf: &Arc<Pframe>) -> KResult<()> {
    if !pf.is_dirty() {
        return Ok(());
    }
    pf.dirty.store(false, Ordering::Release);
    if let Err(e) = mmobj::cleanpage(pf.obj(), pf) {
        pf.dirty.store(true, Ordering::Release);
        return Err(e);
    }
    Ok(())
}

/// Remove o frame do cache e libera a página.
/// Pré-condição: pin zero e não sujo.
pub fn free(pf: &Arc<Pframe>) {
    assert_eq!(pf.pincount(), 0, "free de frame pinado");
    assert!(!pf.is_dirty(), "free de frame sujo");
    let removed = FRAMES.lock().remove(&(pf.obj.id(), pf.pagenum));
    debug_assert!(removed.is_some());
    pf.obj.note_resident_dec();
}

/// Frames residentes de um objeto, em O(#residentes).
pub fn resident_frames(obj: &MemObj) -> Vec<Arc<Pframe>> {
    let id = obj.id();
    FRAMES
        .lock()
        .range((id, 0)..(id + 1, 0))
        .map(|(_, pf)| pf.clone())
        .collect()
}

/// Escreve de volta todas as páginas sujas de um objeto (flush).
pub fn clean_all(obj: &MemObj) -> KResult<()> {
    for pf in resident_frames(obj) {
        clean(&pf)?;
    }
    Ok(())
}

/// Despina, limpa e libera todas as páginas residentes de um objeto.
///
/// Usado pela reclamação de anônimos/shadows e pelo descarte de um vnode.
pub fn uncache_all(obj: &MemObj) {
    for pf in resident_frames(obj) {
        if pf.pincount() > 0 {
            // o pin do fillpage (anon/shadow mantêm a página pinada em vida)
            pf.unpin();
        }
        debug_assert_eq!(pf.pincount(), 0);
        if pf.is_dirty() {
            if let Err(e) = clean(&pf) {
                log::error!("(Pframe) writeback falhou no descarte: {:?}", e);
                pf.dirty.store(false, Ordering::Release);
            }
        }
        free(&pf);
    }
}

/// Número total de frames no cache (diagnóstico/testes)
pub fn cache_len() -> usize {
    FRAMES.lock().len()
}
