//! # S5FS — filesystem em disco
//!
//! Layout: superbloco no bloco 0 (com a lista de blocos livres embutida e
//! encadeada), tabela compacta de inodes a partir do bloco 1, blocos de
//! dados do tamanho de página. Arquivos têm blocos diretos mais um bloco
//! indireto; ponteiro de bloco zero é buraco (lê zeros, aloca só na
//! escrita).
//!
//! Todo o I/O passa pelo cache de pframes: blocos de metadados (superbloco,
//! inodes, indiretos) pelo objeto do dispositivo; conteúdo de arquivo pelo
//! objeto do próprio vnode, com `fillpage`/`cleanpage` traduzindo página de
//! arquivo para bloco de disco via `seek_to_block`.
//!
//! Locking: o mutex do vnode embrulha as operações que podem bloquear no
//! pipeline de páginas; o mutex global do fs é mais estreito e cobre só a
//! mutação do superbloco (ordem: fs sempre por dentro do vnode).

pub mod alloc;
pub mod dirent;
pub mod inode;

use crate::drivers::block::BDev;
use crate::fs::vfs::{
    vget, vput, Dirent, Filesystem, Stat, Vnode, VnodeInit, VnodeMode, VnodeTable,
};
use crate::mm::{pframe, PAGE_SIZE};
use crate::sync::{KMutex, Spinlock};
use crate::sys::{DeviceId, Errno, KResult};
use ::alloc::collections::BTreeMap;
use ::alloc::sync::{Arc, Weak};
use ::alloc::vec;
use ::alloc::vec::Vec;
use inode::{S5Inode, S5Type};

pub const S5_MAGIC: u32 = 0x95f5;
pub const S5_CURRENT_VERSION: u32 = 3;

/// Blocos têm o tamanho de uma página
pub const S5_BLOCK_SIZE: usize = PAGE_SIZE;
/// Bloco do superbloco
pub const S5_SUPER_BLOCK: usize = 0;
/// Entradas da lista de blocos livres embutida no superbloco; a última
/// encadeia a continuação
pub const S5_NBLKS_PER_FNODE: usize = 20;
/// Blocos diretos por inode
pub const S5_NDIRECT_BLOCKS: usize = 28;
/// Entradas do bloco indireto
pub const S5_NIDIRECT_BLOCKS: usize = S5_BLOCK_SIZE / 4;
pub const S5_MAX_FILE_BLOCKS: usize = S5_NDIRECT_BLOCKS + S5_NIDIRECT_BLOCKS;
pub const S5_MAX_FILE_SIZE: usize = S5_MAX_FILE_BLOCKS * S5_BLOCK_SIZE;
/// Fim de lista livre (inodes e cadeia de blocos)
pub const S5_FREE_SENTINEL: u32 = 0xFFFF_FFFF;

pub const S5_INODE_SIZE: usize = 128;
pub const S5_INODES_PER_BLOCK: usize = S5_BLOCK_SIZE / S5_INODE_SIZE;

pub const S5_NAME_LEN: usize = crate::sys::NAME_LEN;
pub const S5_DIRENT_SIZE: usize = 4 + S5_NAME_LEN;

/// Bloco da tabela de inodes que contém o inode `ino`
pub const fn s5_inode_block(ino: u32) -> usize {
    1 + ino as usize / S5_INODES_PER_BLOCK
}

/// Posição do inode dentro do bloco
pub const fn s5_inode_offset(ino: u32) -> usize {
    (ino as usize % S5_INODES_PER_BLOCK) * S5_INODE_SIZE
}

/// Superbloco (cópia em memória, write-through para o bloco 0).
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub magic: u32,
    pub version: u32,
    pub num_inodes: u32,
    /// Cabeça da lista de inodes livres (S5_FREE_SENTINEL = vazia)
    pub free_inode: u32,
    /// Entradas válidas em `free_blocks[0..nfree]`
    pub nfree: u32,
    pub free_blocks: [u32; S5_NBLKS_PER_FNODE],
    pub root_inode: u32,
}

impl Superblock {
    pub const DISK_SIZE: usize = 4 * (6 + S5_NBLKS_PER_FNODE);

    pub fn to_bytes(&self) -> [u8; Self::DISK_SIZE] {
        let mut buf = [0u8; Self::DISK_SIZE];
        let mut w = |i: usize, v: u32| buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        w(0, self.magic);
        w(1, self.version);
        w(2, self.num_inodes);
        w(3, self.free_inode);
        w(4, self.nfree);
        for (i, b) in self.free_blocks.iter().enumerate() {
            w(5 + i, *b);
        }
        w(5 + S5_NBLKS_PER_FNODE, self.root_inode);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Superblock {
        let r = |i: usize| {
            u32::from_le_bytes([buf[i * 4], buf[i * 4 + 1], buf[i * 4 + 2], buf[i * 4 + 3]])
        };
        let mut free_blocks = [0u32; S5_NBLKS_PER_FNODE];
        for (i, b) in free_blocks.iter_mut().enumerate() {
            *b = r(5 + i);
        }
        Superblock {
            magic: r(0),
            version: r(1),
            num_inodes: r(2),
            free_inode: r(3),
            nfree: r(4),
            free_blocks,
            root_inode: r(5 + S5_NBLKS_PER_FNODE),
        }
    }

    /// Sanidade do superbloco (montagem e desmontagem)
    pub fn check(&self) -> KResult<()> {
        if self.magic != S5_MAGIC
            || (self.free_inode >= self.num_inodes && self.free_inode != S5_FREE_SENTINEL)
            || self.root_inode >= self.num_inodes
        {
            return Err(Errno::EINVAL);
        }
        if self.version != S5_CURRENT_VERSION {
            log::error!(
                "(S5FS) versão {} não suportada (esperada {})",
                self.version,
                S5_CURRENT_VERSION
            );
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}

/// Instância montada de um S5FS.
pub struct S5fs {
    myself: Weak<S5fs>,
    pub(super) bdev: Arc<BDev>,
    pub(super) sb: Spinlock<Superblock>,
    /// Mutex global do fs: só mutação do superbloco
    pub(super) fsmutex: KMutex,
    vnodes: VnodeTable,
}

impl S5fs {
    /// Monta o filesystem do dispositivo dado, validando o superbloco.
    pub fn mount(bdev: Arc<BDev>) -> KResult<Arc<S5fs>> {
        let pf = pframe::get(&bdev.obj, S5_SUPER_BLOCK)?;
        let sb = pf.with_data(Superblock::from_bytes);
        sb.check()?;

        log::info!(
            "(S5FS) montado: {} inodes, raiz no inode {}",
            sb.num_inodes,
            sb.root_inode
        );

        Ok(Arc::new_cyclic(|weak| S5fs {
            myself: weak.clone(),
            bdev,
            sb: Spinlock::new(sb),
            fsmutex: KMutex::new(),
            vnodes: VnodeTable::new(),
        }))
    }

    /// Página de um bloco do disco, pelo cache do dispositivo.
    pub(super) fn block_page(&self, blockno: usize) -> KResult<Arc<pframe::Pframe>> {
        pframe::get(&self.bdev.obj, blockno)
    }

    /// Write-through do superbloco para o bloco 0.
    pub(super) fn write_super(&self) -> KResult<()> {
        let bytes = self.sb.lock().to_bytes();
        let pf = self.block_page(S5_SUPER_BLOCK)?;
        pf.with_data_mut(|data| data[..Superblock::DISK_SIZE].copy_from_slice(&bytes));
        pframe::dirty(&pf)
    }

    /// Formata o dispositivo: superbloco, tabela de inodes encadeada, raiz
    /// com `.` e `..`, e todos os blocos restantes na lista livre.
    ///
    /// `num_inodes` é arredondado para cima até encher o último bloco da
    /// tabela.
    pub fn format(dev: &dyn crate::drivers::block::BlockDevice, num_inodes: u32) -> KResult<()> {
        let nblocks = dev.blocks();
        let inode_blocks =
            (num_inodes as usize + S5_INODES_PER_BLOCK - 1) / S5_INODES_PER_BLOCK;
        let num_inodes = (inode_blocks * S5_INODES_PER_BLOCK) as u32;
        let root_data = 1 + inode_blocks;
        if nblocks <= root_data + 1 {
            return Err(Errno::ENOSPC);
        }

        // tabela de inodes: 0 é a raiz, o resto forma a lista livre
        for bi in 0..inode_blocks {
            let mut page = vec![0u8; S5_BLOCK_SIZE];
            for slot in 0..S5_INODES_PER_BLOCK {
                let ino = (bi * S5_INODES_PER_BLOCK + slot) as u32;
                let inode = if ino == 0 {
                    let mut root = S5Inode::empty(0, S5Type::Dir);
                    // "." não conta; ".." para si mesma + âncora de raiz
                    root.linkcount = 2;
                    root.size = (2 * S5_DIRENT_SIZE) as u32;
                    root.direct[0] = root_data as u32;
                    root
                } else {
                    let mut free = S5Inode::empty(ino, S5Type::Free);
                    free.indirect = if ino + 1 < num_inodes {
                        ino + 1
                    } else {
                        S5_FREE_SENTINEL
                    };
                    free
                };
                page[slot * S5_INODE_SIZE..(slot + 1) * S5_INODE_SIZE]
                    .copy_from_slice(&inode.to_bytes());
            }
            dev.write_block(1 + bi, &page)?;
        }

        // bloco de dados da raiz: "." e ".."
        let mut rootdir = vec![0u8; S5_BLOCK_SIZE];
        rootdir[..S5_DIRENT_SIZE].copy_from_slice(&dirent::encode_dirent(0, "."));
        rootdir[S5_DIRENT_SIZE..2 * S5_DIRENT_SIZE]
            .copy_from_slice(&dirent::encode_dirent(0, ".."));
        dev.write_block(root_data, &rootdir)?;

        // lista de blocos livres, construída com o mesmo algoritmo do
        // free_block (array embutido + blocos de continuação)
        let mut sb = Superblock {
            magic: S5_MAGIC,
            version: S5_CURRENT_VERSION,
            num_inodes,
            free_inode: if num_inodes > 1 { 1 } else { S5_FREE_SENTINEL },
            nfree: 0,
            free_blocks: [0u32; S5_NBLKS_PER_FNODE],
            root_inode: 0,
        };
        sb.free_blocks[S5_NBLKS_PER_FNODE - 1] = S5_FREE_SENTINEL;

        for b in (root_data + 1)..nblocks {
            if sb.nfree as usize == S5_NBLKS_PER_FNODE - 1 {
                // array cheio: vira bloco de continuação
                let mut page = vec![0u8; S5_BLOCK_SIZE];
                for (i, blk) in sb.free_blocks.iter().enumerate() {
                    page[i * 4..i * 4 + 4].copy_from_slice(&blk.to_le_bytes());
                }
                dev.write_block(b, &page)?;
                sb.nfree = 0;
                sb.free_blocks[S5_NBLKS_PER_FNODE - 1] = b as u32;
            } else {
                sb.free_blocks[sb.nfree as usize] = b as u32;
                sb.nfree += 1;
            }
        }

        let mut page = vec![0u8; S5_BLOCK_SIZE];
        page[..Superblock::DISK_SIZE].copy_from_slice(&sb.to_bytes());
        dev.write_block(S5_SUPER_BLOCK, &page)?;

        log::info!(
            "(S5FS) formatado: {} blocos, {} inodes",
            nblocks,
            num_inodes
        );
        Ok(())
    }

    /// Contagem de blocos livres alcançáveis (diagnóstico/testes): os do
    /// array embutido mais as cadeias de continuação.
    pub fn free_block_count(&self) -> KResult<usize> {
        let (mut count, mut chain) = {
            let sb = self.sb.lock();
            (
                sb.nfree as usize,
                sb.free_blocks[S5_NBLKS_PER_FNODE - 1],
            )
        };
        while chain != S5_FREE_SENTINEL {
            // o próprio bloco de cadeia é alocável mais 19 entradas
            let pf = self.block_page(chain as usize)?;
            let entries = pf.with_data(|d| {
                let mut e = [0u32; S5_NBLKS_PER_FNODE];
                for (i, v) in e.iter_mut().enumerate() {
                    *v = u32::from_le_bytes([d[i * 4], d[i * 4 + 1], d[i * 4 + 2], d[i * 4 + 3]]);
                }
                e
            });
            count += S5_NBLKS_PER_FNODE;
            chain = entries[S5_NBLKS_PER_FNODE - 1];
        }
        Ok(count)
    }

    /// Auditoria de refcounts: percorre a árvore contando referências de
    /// dirents (excluindo ".") e compara com os linkcounts em disco.
    /// Retorna true se tudo confere.
    pub fn check_refcounts(self: &Arc<Self>) -> KResult<bool> {
        let fs = self.fs_arc();
        let root_vno = self.root_vno();

        let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
        let mut stack: Vec<u32> = vec![root_vno];
        let mut visited: Vec<u32> = Vec::new();

        while let Some(vno) = stack.pop() {
            if visited.contains(&vno) {
                continue;
            }
            visited.push(vno);

            let vn = vget(&fs, vno)?;
            if vn.mode().is_dir() {
                let mut off = 0;
                while let Some((d, consumed)) = self.readdir(&vn, off)? {
                    if d.name != "." {
                        *counts.entry(d.ino).or_insert(0) += 1;
                        if !visited.contains(&d.ino) {
                            stack.push(d.ino);
                        }
                    }
                    off += consumed;
                }
            }
            vput(vn);
        }

        let mut ok = true;
        for (&vno, &expected) in counts.iter() {
            let vn = vget(&fs, vno)?;
            let inode = self.read_inode(vno)?;
            // compensações: a referência do auditor; a raiz ainda carrega a
            // âncora de raiz
            let held = if vno == root_vno { 2 } else { 1 };
            let actual = inode.linkcount as u32 - held;
            if actual != expected {
                log::error!(
                    "(S5FS) inode {}: esperado linkcount {}, encontrado {}",
                    vno,
                    expected,
                    actual
                );
                ok = false;
            }
            vput(vn);
        }
        Ok(ok)
    }
}

impl Filesystem for S5fs {
    fn read_vnode(&self, vno: u32) -> KResult<VnodeInit> {
        let mut inode = self.read_inode(vno)?;

        // o VFS segura um link enquanto o vnode viver
        inode.linkcount += 1;
        self.write_inode(&inode)?;

        let mode = match inode.ty()? {
            S5Type::Data => VnodeMode::Regular,
            S5Type::Dir => VnodeMode::Directory,
            S5Type::Chr => VnodeMode::Chr(DeviceId(inode.indirect as u16)),
            S5Type::Blk => VnodeMode::Blk(DeviceId(inode.indirect as u16)),
            S5Type::Free => {
                log::error!("(S5FS) read_vnode de inode livre {}", vno);
                return Err(Errno::ENOENT);
            }
        };

        Ok(VnodeInit {
            mode,
            len: inode.size as usize,
        })
    }

    fn delete_vnode(&self, vno: u32) {
        let res: KResult<()> = (|| {
            let mut inode = self.read_inode(vno)?;
            debug_assert!(inode.linkcount > 0);
            inode.linkcount -= 1;
            self.write_inode(&inode)?;
            if inode.linkcount == 0 {
                self.free_inode(vno)?;
            }
            Ok(())
        })();
        if let Err(e) = res {
            log::error!("(S5FS) delete_vnode({}) falhou: {:?}", vno, e);
        }
    }

    fn root_vno(&self) -> u32 {
        self.sb.lock().root_inode
    }

    fn vnode_table(&self) -> &VnodeTable {
        &self.vnodes
    }

    fn fs_arc(&self) -> Arc<dyn Filesystem> {
        self.myself.upgrade().expect("filesystem vivo")
    }

    fn umount(&self) -> KResult<()> {
        if !self.vnodes.is_empty() {
            log::warn!(
                "(S5FS) desmontando com {} vnodes ainda referenciados",
                self.vnodes.len()
            );
        }
        if let Some(fs) = self.myself.upgrade() {
            match fs.check_refcounts() {
                Ok(true) => {}
                Ok(false) => log::warn!("(S5FS) corrupção de linkcount detectada no umount"),
                Err(e) => log::error!("(S5FS) auditoria de refcounts falhou: {:?}", e),
            }
        }
        self.sb.lock().check()?;
        self.write_super()?;
        pframe::clean_all(&self.bdev.obj)
    }

    fn lookup(&self, dir: &Arc<Vnode>, name: &str) -> KResult<Arc<Vnode>> {
        let _g = dir.mutex.guard();
        let ino = self.find_dirent(dir, name)?;
        vget(&self.fs_arc(), ino)
    }

    fn create(&self, dir: &Arc<Vnode>, name: &str) -> KResult<Arc<Vnode>> {
        let _g = dir.mutex.guard();

        if self.find_dirent(dir, name).is_ok() {
            return Err(Errno::EEXIST);
        }

        let ino = self.alloc_inode(S5Type::Data, 0)?;
        let vn = vget(&self.fs_arc(), ino)?;

        if let Err(e) = self.link_dirent(dir, name, ino) {
            // o vput derruba o linkcount a zero e libera o inode
            vput(vn);
            return Err(e);
        }
        Ok(vn)
    }

    fn mknod(&self, dir: &Arc<Vnode>, name: &str, mode: VnodeMode) -> KResult<()> {
        let _g = dir.mutex.guard();

        if self.find_dirent(dir, name).is_ok() {
            return Err(Errno::EEXIST);
        }

        let (ty, devid) = match mode {
            VnodeMode::Chr(id) => (S5Type::Chr, id.0 as u32),
            VnodeMode::Blk(id) => (S5Type::Blk, id.0 as u32),
            _ => return Err(Errno::EINVAL),
        };

        let ino = self.alloc_inode(ty, devid)?;
        let vn = vget(&self.fs_arc(), ino)?;
        let res = self.link_dirent(dir, name, ino);
        vput(vn);
        res
    }

    fn link(&self, src: &Arc<Vnode>, dir: &Arc<Vnode>, name: &str) -> KResult<()> {
        let _g = dir.mutex.guard();
        self.link_dirent(dir, name, src.vno())
    }

    fn unlink(&self, dir: &Arc<Vnode>, name: &str) -> KResult<()> {
        let _g = dir.mutex.guard();
        self.remove_dirent(dir, name)
    }

    fn mkdir(&self, dir: &Arc<Vnode>, name: &str) -> KResult<()> {
        let _g = dir.mutex.guard();

        if dir.len() >= S5_MAX_FILE_SIZE {
            return Err(Errno::ENOSPC);
        }
        if self.find_dirent(dir, name).is_ok() {
            return Err(Errno::EEXIST);
        }

        let ino = self.alloc_inode(S5Type::Dir, 0)?;
        let child = vget(&self.fs_arc(), ino)?;

        if let Err(e) = self.link_dirent(dir, name, ino) {
            vput(child);
            return Err(e);
        }

        // "." (sem bump de linkcount) e ".." (incrementa o pai)
        if let Err(e) = self.link_dirent(&child, ".", ino) {
            let _ = self.remove_dirent(dir, name);
            vput(child);
            return Err(e);
        }
        if let Err(e) = self.link_dirent(&child, "..", dir.vno()) {
            let _ = self.remove_dirent(&child, ".");
            let _ = self.remove_dirent(dir, name);
            vput(child);
            return Err(e);
        }

        debug_assert_eq!(self.read_inode(ino)?.linkcount, 2);
        vput(child);
        Ok(())
    }

    fn rmdir(&self, dir: &Arc<Vnode>, name: &str) -> KResult<()> {
        let _g = dir.mutex.guard();
        debug_assert!(name != "." && name != "..");

        let ino = self.find_dirent(dir, name)?;
        let child = vget(&self.fs_arc(), ino)?;

        if !child.mode().is_dir() {
            vput(child);
            return Err(Errno::ENOTDIR);
        }
        // vazio = só "." e ".."
        if child.len() != 2 * S5_DIRENT_SIZE {
            vput(child);
            return Err(Errno::ENOTEMPTY);
        }

        // ".." deixa de referenciar o pai
        if let Err(e) = self.remove_dirent(&child, "..") {
            vput(child);
            return Err(e);
        }
        if let Err(e) = self.remove_dirent(dir, name) {
            // restaurar o ".." para não corromper o diretório
            let _ = self.link_dirent(&child, "..", dir.vno());
            vput(child);
            return Err(e);
        }

        vput(child);
        Ok(())
    }

    fn readdir(&self, dir: &Arc<Vnode>, off: usize) -> KResult<Option<(Dirent, usize)>> {
        if off % S5_DIRENT_SIZE != 0 {
            return Err(Errno::EINVAL);
        }
        if off >= dir.len() {
            return Ok(None);
        }

        let mut buf = [0u8; S5_DIRENT_SIZE];
        let n = self.read_file(dir, off, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        debug_assert_eq!(n, S5_DIRENT_SIZE);

        let (ino, name) = dirent::decode_dirent(&buf);
        Ok(Some((Dirent { ino, name }, S5_DIRENT_SIZE)))
    }

    fn read(&self, vn: &Arc<Vnode>, off: usize, buf: &mut [u8]) -> KResult<usize> {
        let _g = vn.mutex.guard();
        self.read_file(vn, off, buf)
    }

    fn write(&self, vn: &Arc<Vnode>, off: usize, buf: &[u8]) -> KResult<usize> {
        let _g = vn.mutex.guard();
        self.write_file(vn, off, buf)
    }

    fn stat(&self, vn: &Arc<Vnode>) -> KResult<Stat> {
        let inode = self.read_inode(vn.vno())?;
        Ok(Stat {
            ino: vn.vno(),
            mode: vn.mode(),
            // compensa a referência que o VFS segura
            nlink: inode.linkcount as u32 - 1,
            size: vn.len(),
            blksize: S5_BLOCK_SIZE,
            blocks: self.inode_blocks(&inode)?,
        })
    }

    fn fillpage(&self, vn: &Arc<Vnode>, off: usize, buf: &mut [u8]) -> KResult<()> {
        let blockno = self.seek_to_block(vn.vno(), off, false)?;
        if blockno == 0 {
            // buraco: lê zeros, sem alocar
            buf.fill(0);
            return Ok(());
        }
        self.bdev.dev.read_block(blockno as usize, buf)
    }

    fn dirtypage(&self, vn: &Arc<Vnode>, off: usize) -> KResult<()> {
        let blockno = self.seek_to_block(vn.vno(), off, false)?;
        if blockno == 0 {
            let blockno = self.seek_to_block(vn.vno(), off, true)?;
            debug_assert!(blockno != 0);
        }
        Ok(())
    }

    fn cleanpage(&self, vn: &Arc<Vnode>, off: usize, buf: &[u8]) -> KResult<()> {
        let blockno = self.seek_to_block(vn.vno(), off, false)?;
        // página suja implica bloco alocado (dirtypage veio antes)
        debug_assert!(blockno != 0);
        self.bdev.dev.write_block(blockno as usize, buf)
    }
}
