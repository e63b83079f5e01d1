//! VFS: vnodes e o contrato de filesystem.
//!
//! Um vnode representa um objeto de filesystem aberto (arquivo, diretório,
//! dispositivo), um-para-um com o inode enquanto referenciado. A tabela de
//! vnodes de cada filesystem garante a unicidade; `vget`/`vref`/`vput`
//! gerem a contagem de referências. No último put o conteúdo em cache é
//! escrito de volta e descartado, e o filesystem é avisado via
//! `delete_vnode` (que apaga o inode do disco se o linkcount zerou).

pub mod file;
pub mod path;
pub mod syscall;

use crate::mm::mmobj::{self, MemObj};
use crate::sync::{KMutex, Spinlock};
use crate::sys::{DeviceId, Errno, KResult};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Tipo de um vnode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeMode {
    Regular,
    Directory,
    /// Dispositivo de caractere
    Chr(DeviceId),
    /// Dispositivo de bloco
    Blk(DeviceId),
}

impl VnodeMode {
    pub fn is_dir(self) -> bool {
        self == VnodeMode::Directory
    }

    pub fn is_regular(self) -> bool {
        self == VnodeMode::Regular
    }
}

/// Metadados de stat(2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub ino: u32,
    pub mode: VnodeMode,
    pub nlink: u32,
    pub size: usize,
    pub blksize: usize,
    pub blocks: usize,
}

/// Entrada de diretório devolvida por readdir/getdent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub ino: u32,
    pub name: String,
}

/// Estado inicial de um vnode, lido do disco
pub struct VnodeInit {
    pub mode: VnodeMode,
    pub len: usize,
}

/// Contrato de um filesystem concreto (entradas de fs e de vnode).
pub trait Filesystem: Send + Sync {
    // --- nível de filesystem ---

    /// Carrega o inode e registra o uso pelo VFS (incrementa o linkcount em
    /// disco enquanto o vnode estiver vivo).
    fn read_vnode(&self, vno: u32) -> KResult<VnodeInit>;

    /// Solta o uso do VFS (decrementa o linkcount; remove o inode do disco
    /// quando ele chega a zero).
    fn delete_vnode(&self, vno: u32);

    fn root_vno(&self) -> u32;

    fn vnode_table(&self) -> &VnodeTable;

    /// Referência `Arc` para o próprio filesystem
    fn fs_arc(&self) -> Arc<dyn Filesystem>;

    /// Desmontagem: auditoria de refcounts e writeback final
    fn umount(&self) -> KResult<()>;

    // --- operações de diretório ---

    fn lookup(&self, dir: &Arc<Vnode>, name: &str) -> KResult<Arc<Vnode>>;
    fn create(&self, dir: &Arc<Vnode>, name: &str) -> KResult<Arc<Vnode>>;
    fn mknod(&self, dir: &Arc<Vnode>, name: &str, mode: VnodeMode) -> KResult<()>;
    fn link(&self, src: &Arc<Vnode>, dir: &Arc<Vnode>, name: &str) -> KResult<()>;
    fn unlink(&self, dir: &Arc<Vnode>, name: &str) -> KResult<()>;
    fn mkdir(&self, dir: &Arc<Vnode>, name: &str) -> KResult<()>;
    fn rmdir(&self, dir: &Arc<Vnode>, name: &str) -> KResult<()>;
    /// Lê a entrada na posição `off` (em bytes); devolve a entrada e
    /// quantos bytes ela consome, ou None no fim.
    fn readdir(&self, dir: &Arc<Vnode>, off: usize) -> KResult<Option<(Dirent, usize)>>;

    // --- operações de arquivo ---

    fn read(&self, vn: &Arc<Vnode>, off: usize, buf: &mut [u8]) -> KResult<usize>;
    fn write(&self, vn: &Arc<Vnode>, off: usize, buf: &[u8]) -> KResult<usize>;
    fn stat(&self, vn: &Arc<Vnode>) -> KResult<Stat>;

    // --- pipeline de páginas (chamadas pelo objeto de memória do vnode) ---

    fn fillpage(&self, vn: &Arc<Vnode>, off: usize, buf: &mut [u8]) -> KResult<()>;
    fn dirtypage(&self, vn: &Arc<Vnode>, off: usize) -> KResult<()>;
    fn cleanpage(&self, vn: &Arc<Vnode>, off: usize, buf: &[u8]) -> KResult<()>;
}

/// Vnode: um objeto de filesystem em memória.
pub struct Vnode {
    vno: u32,
    fs: Arc<dyn Filesystem>,
    mode: VnodeMode,
    len: Spinlock<usize>,
    refcount: AtomicUsize,
    /// Objeto de memória embutido (conteúdo do arquivo no cache de páginas)
    mmobj: Arc<MemObj>,
    /// Serializa operações que podem bloquear no pipeline de pframes
    pub mutex: KMutex,
}

impl Vnode {
    fn new(fs: Arc<dyn Filesystem>, vno: u32, init: VnodeInit) -> Arc<Vnode> {
        Arc::new_cyclic(|weak| Vnode {
            vno,
            fs,
            mode: init.mode,
            len: Spinlock::new(init.len),
            refcount: AtomicUsize::new(1),
            mmobj: MemObj::new_vnode(weak.clone()),
            mutex: KMutex::new(),
        })
    }

    pub fn vno(&self) -> u32 {
        self.vno
    }

    pub fn mode(&self) -> VnodeMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        *self.len.lock()
    }

    pub fn set_len(&self, len: usize) {
        *self.len.lock() = len;
    }

    pub fn fs(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    pub fn mmobj(&self) -> &Arc<MemObj> {
        &self.mmobj
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

/// Tabela de vnodes de um filesystem: um vnode por inode referenciado.
pub struct VnodeTable {
    map: Spinlock<BTreeMap<u32, Arc<Vnode>>>,
}

impl VnodeTable {
    pub const fn new() -> Self {
        Self {
            map: Spinlock::new(BTreeMap::new()),
        }
    }

    fn get(&self, vno: u32) -> Option<Arc<Vnode>> {
        self.map.lock().get(&vno).cloned()
    }

    fn insert(&self, vn: Arc<Vnode>) {
        let old = self.map.lock().insert(vn.vno, vn);
        debug_assert!(old.is_none(), "dois vnodes para o mesmo inode");
    }

    fn remove(&self, vno: u32) {
        self.map.lock().remove(&vno);
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

/// Obtém o vnode do inode `vno`, carregando-o se necessário.
/// A referência devolvida pertence ao chamador (solte com `vput`).
pub fn vget(fs: &Arc<dyn Filesystem>, vno: u32) -> KResult<Arc<Vnode>> {
    let table = fs.vnode_table();
    if let Some(vn) = table.get(vno) {
        vn.refcount.fetch_add(1, Ordering::AcqRel);
        return Ok(vn);
    }

    let init = fs.read_vnode(vno)?;
    let vn = Vnode::new(fs.clone(), vno, init);
    table.insert(vn.clone());
    Ok(vn)
}

/// Incrementa a contagem de referências de um vnode já obtido.
pub fn vref(vn: &Arc<Vnode>) {
    let old = vn.refcount.fetch_add(1, Ordering::AcqRel);
    debug_assert!(old > 0);
}

/// Solta uma referência. No último put: escreve de volta as páginas sujas,
/// descarta o cache e avisa o filesystem (`delete_vnode`), que apaga o
/// inode se não restou nenhum link.
pub fn vput(vn: Arc<Vnode>) {
    let old = vn.refcount.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(old > 0, "vput sem referência");
    if old > 1 {
        return;
    }

    // flush antes do descarte
    if let Err(e) = crate::mm::pframe::clean_all(&vn.mmobj) {
        log::error!("(VFS) writeback do vnode {} falhou: {:?}", vn.vno, e);
    }
    crate::mm::pframe::uncache_all(&vn.mmobj);

    vn.fs.delete_vnode(vn.vno);
    vn.fs.vnode_table().remove(vn.vno);
}

/// Operação mmap de um vnode: devolve o objeto de memória do arquivo com a
/// contagem incrementada (o que também segura o vnode).
pub fn vnode_mmap(vn: &Arc<Vnode>) -> KResult<Arc<MemObj>> {
    if !vn.mode().is_regular() {
        return Err(Errno::EACCES);
    }
    let obj = vn.mmobj.clone();
    mmobj::ref_obj(&obj);
    Ok(obj)
}
