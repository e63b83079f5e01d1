//! Objetos de memória (mmobj).
//!
//! Um objeto de memória é uma fonte/destino abstrato de páginas indexadas
//! por número. As variantes são um enum (grafo de shadows é uma árvore sobre
//! um único objeto de fundo não-shadow):
//!
//! - `Anon`: fornece páginas zeradas (pinadas enquanto residentes);
//! - `BlockDev`: cache de páginas de um dispositivo de bloco;
//! - `Vnode`: conteúdo de arquivo, delegado ao filesystem do vnode;
//! - `Shadow`: copy-on-write — leituras caem para o `shadowed`, escritas
//!   copiam para si.
//!
//! Contagem de referências é explícita (`ref_obj`/`put`): cada vmarea, cada
//! elo de cadeia shadow e cada página residente contam um. Quando, num put,
//! a contagem cai ao número de páginas residentes, só as páginas seguram o
//! objeto: anônimos e shadows descartam tudo e morrem (`refcount == nrespages`
//! é o gatilho de reclamação).

use crate::drivers::block::BlockDevice;
use crate::mm::{pframe, PAGE_SIZE};
use crate::sys::KResult;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Variantes de objeto de memória
pub enum MemObjKind {
    Anon,
    BlockDev {
        dev: Arc<dyn BlockDevice>,
    },
    Vnode {
        vnode: Weak<crate::fs::vfs::Vnode>,
    },
    Shadow {
        /// Pai imediato (possivelmente outro shadow)
        shadowed: Arc<MemObj>,
        /// Ancestral não-shadow na raiz da cadeia
        bottom: Arc<MemObj>,
    },
}

/// Objeto de memória.
pub struct MemObj {
    /// Chave no cache de pframes
    id: u64,
    refcount: AtomicUsize,
    nrespages: AtomicUsize,
    pub kind: MemObjKind,
}

static NEXT_OBJ_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_id() -> u64 {
    NEXT_OBJ_ID.fetch_add(1, Ordering::Relaxed)
}

impl MemObj {
    fn new(kind: MemObjKind) -> Arc<Self> {
        Arc::new(Self {
            id: fresh_id(),
            refcount: AtomicUsize::new(1),
            nrespages: AtomicUsize::new(0),
            kind,
        })
    }

    /// Objeto anônimo (páginas zeradas); refcount inicial 1 (do criador)
    pub fn new_anon() -> Arc<Self> {
        Self::new(MemObjKind::Anon)
    }

    /// Cache de páginas de um dispositivo de bloco
    pub fn new_blockdev(dev: Arc<dyn BlockDevice>) -> Arc<Self> {
        Self::new(MemObjKind::BlockDev { dev })
    }

    /// Objeto de arquivo, embutido no vnode
    pub fn new_vnode(vnode: Weak<crate::fs::vfs::Vnode>) -> Arc<Self> {
        Self::new(MemObjKind::Vnode { vnode })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn nrespages(&self) -> usize {
        self.nrespages.load(Ordering::Acquire)
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self.kind, MemObjKind::Shadow { .. })
    }

    /// Anônimos e shadows se autodestroem quando só as páginas os seguram
    fn reclaims_pages(&self) -> bool {
        matches!(self.kind, MemObjKind::Anon | MemObjKind::Shadow { .. })
    }

    /// Contabilidade do cache de pframes: página ficou residente.
    /// Cada residente segura uma referência no objeto.
    pub(crate) fn note_resident_inc(&self) {
        self.nrespages.fetch_add(1, Ordering::AcqRel);
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Contabilidade do cache de pframes: página deixou de ser residente.
    pub(crate) fn note_resident_dec(&self) {
        let old = self.nrespages.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0);
        let old = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0);
    }
}

/// Incrementa a contagem de referências.
pub fn ref_obj(o: &Arc<MemObj>) {
    o.refcount.fetch_add(1, Ordering::AcqRel);
    // o objeto de arquivo espelha a referência no vnode dono
    if let MemObjKind::Vnode { vnode } = &o.kind {
        if let Some(vn) = vnode.upgrade() {
            crate::fs::vfs::vref(&vn);
        }
    }
}

/// Decrementa a contagem de referências.
///
/// Se a contagem cair ao número de páginas residentes e o objeto for
/// anônimo/shadow, todas as páginas são despinadas, limpas e liberadas; ao
/// chegar a zero o shadow também solta `shadowed` e `bottom`.
pub fn put(o: &Arc<MemObj>) {
    let rc = o.refcount();
    let nres = o.nrespages();
    debug_assert!(rc > 0, "put em objeto sem referências");
    debug_assert!(nres < rc, "nrespages {} >= refcount {}", nres, rc);

    if o.reclaims_pages() && rc - 1 == nres && nres > 0 {
        // a última referência externa caiu: descartar as páginas
        pframe::uncache_all(o);
        debug_assert_eq!(o.nrespages(), 0);
    }

    let now = o.refcount.fetch_sub(1, Ordering::AcqRel) - 1;
    if now == 0 {
        if let MemObjKind::Shadow { shadowed, bottom } = &o.kind {
            put(shadowed);
            put(bottom);
        }
    }

    if let MemObjKind::Vnode { vnode } = &o.kind {
        if let Some(vn) = vnode.upgrade() {
            crate::fs::vfs::vput(vn);
        }
    }
}

/// Objeto de fundo de uma cadeia: o próprio, se não for shadow.
pub fn bottom_obj(o: &Arc<MemObj>) -> Arc<MemObj> {
    match &o.kind {
        MemObjKind::Shadow { bottom, .. } => bottom.clone(),
        _ => o.clone(),
    }
}

/// Embrulha `obj` num shadow novo.
///
/// A referência que o chamador tinha sobre `obj` passa a pertencer ao campo
/// `shadowed` do shadow; o bottom ganha uma referência nova. O chamador fica
/// com a referência inicial do shadow.
pub fn shadow_wrap(obj: Arc<MemObj>) -> Arc<MemObj> {
    let bottom = bottom_obj(&obj);
    ref_obj(&bottom);
    MemObj::new(MemObjKind::Shadow {
        shadowed: obj,
        bottom,
    })
}

/// Resolve `(objeto, página)` para um frame residente.
///
/// `forwrite=false` num shadow desce a cadeia (iterativamente — cadeias
/// longas estouram a pilha numa versão recursiva) procurando o primeiro
/// nível com a página residente; sem ninguém, busca no bottom. Com
/// `forwrite=true` o frame é obtido no próprio objeto, e o `fillpage` do
/// shadow faz a cópia (o COW em si).
pub fn lookuppage(o: &Arc<MemObj>, pagenum: usize, forwrite: bool) -> KResult<Arc<pframe::Pframe>> {
    if !forwrite {
        if let MemObjKind::Shadow { bottom, .. } = &o.kind {
            let bottom = bottom.clone();
            let mut cur = o.clone();
            while !Arc::ptr_eq(&cur, &bottom) {
                if let Some(pf) = pframe::get_resident(&cur, pagenum) {
                    return Ok(pf);
                }
                cur = match &cur.kind {
                    MemObjKind::Shadow { shadowed, .. } => shadowed.clone(),
                    _ => unreachable!("cadeia de shadow termina antes do bottom"),
                };
            }
            debug_assert!(!bottom.is_shadow());
            return lookuppage(&bottom, pagenum, false);
        }
    }
    pframe::get(o, pagenum)
}

/// Preenche o conteúdo de um frame recém-alocado. Pode bloquear (I/O).
pub(crate) fn fillpage(o: &Arc<MemObj>, pf: &Arc<pframe::Pframe>) -> KResult<()> {
    match &o.kind {
        MemObjKind::Anon => {
            pf.zero();
            pf.pin();
            Ok(())
        }
        MemObjKind::BlockDev { dev } => pf.with_data_mut(|buf| dev.read_block(pf.pagenum(), buf)),
        MemObjKind::Vnode { vnode } => {
            let vn = vnode.upgrade().ok_or(crate::sys::Errno::EIO)?;
            pf.with_data_mut(|buf| vn.fs().fillpage(&vn, pf.pagenum() * PAGE_SIZE, buf))
        }
        MemObjKind::Shadow { shadowed, bottom } => {
            // copiar do ancestral mais próximo que tenha a página
            let mut cur = shadowed.clone();
            while !Arc::ptr_eq(&cur, bottom) {
                if let Some(src) = pframe::get_resident(&cur, pf.pagenum()) {
                    pf.copy_from(&src);
                    pf.pin();
                    return Ok(());
                }
                cur = match &cur.kind {
                    MemObjKind::Shadow { shadowed, .. } => shadowed.clone(),
                    _ => unreachable!("cadeia de shadow termina antes do bottom"),
                };
            }
            let src = pframe::get(bottom, pf.pagenum())?;
            pf.copy_from(&src);
            pf.pin();
            Ok(())
        }
    }
}

/// Reconhece a intenção de sujar a página; pode alocar backing (blocos
/// esparsos do filesystem).
pub(crate) fn dirtypage(o: &Arc<MemObj>, pf: &Arc<pframe::Pframe>) -> KResult<()> {
    match &o.kind {
        MemObjKind::Vnode { vnode } => {
            let vn = vnode.upgrade().ok_or(crate::sys::Errno::EIO)?;
            vn.fs().dirtypage(&vn, pf.pagenum() * PAGE_SIZE)
        }
        _ => Ok(()),
    }
}

/// Escreve de volta o conteúdo de uma página suja.
pub(crate) fn cleanpage(o: &Arc<MemObj>, pf: &Arc<pframe::Pframe>) -> KResult<()> {
    match &o.kind {
        MemObjKind::BlockDev { dev } => pf.with_data(|buf| dev.write_block(pf.pagenum(), buf)),
        MemObjKind::Vnode { vnode } => {
            let vn = vnode.upgrade().ok_or(crate::sys::Errno::EIO)?;
            pf.with_data(|buf| vn.fs().cleanpage(&vn, pf.pagenum() * PAGE_SIZE, buf))
        }
        _ => Ok(()),
    }
}
