//! Inodes do S5FS: codec de disco, alocação e o caminho de dados
//! (seek_to_block, read_file, write_file).

use super::{
    s5_inode_block, s5_inode_offset, S5fs, S5_BLOCK_SIZE, S5_FREE_SENTINEL, S5_INODE_SIZE,
    S5_MAX_FILE_BLOCKS, S5_MAX_FILE_SIZE, S5_NDIRECT_BLOCKS, S5_NIDIRECT_BLOCKS,
};
use crate::fs::vfs::Vnode;
use crate::mm::pframe;
use crate::sys::{Errno, KResult};
use alloc::sync::Arc;

/// Tipo de inode em disco
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum S5Type {
    Free = 0,
    Data = 1,
    Dir = 2,
    Chr = 3,
    Blk = 4,
}

/// Inode (128 bytes em disco: número, tipo, linkcount, tamanho, diretos,
/// indireto). O campo `indirect` é reaproveitado: devid para CHR/BLK,
/// próximo-livre quando o inode está na lista livre.
#[derive(Debug, Clone)]
pub struct S5Inode {
    pub number: u32,
    pub ty_raw: u16,
    pub linkcount: u16,
    pub size: u32,
    pub direct: [u32; S5_NDIRECT_BLOCKS],
    pub indirect: u32,
}

impl S5Inode {
    pub fn empty(number: u32, ty: S5Type) -> Self {
        Self {
            number,
            ty_raw: ty as u16,
            linkcount: 0,
            size: 0,
            direct: [0u32; S5_NDIRECT_BLOCKS],
            indirect: 0,
        }
    }

    pub fn ty(&self) -> KResult<S5Type> {
        match self.ty_raw {
            0 => Ok(S5Type::Free),
            1 => Ok(S5Type::Data),
            2 => Ok(S5Type::Dir),
            3 => Ok(S5Type::Chr),
            4 => Ok(S5Type::Blk),
            t => {
                log::error!("(S5FS) inode {} com tipo inválido {}", self.number, t);
                Err(Errno::EIO)
            }
        }
    }

    /// Tipos que usam blocos de dados (e o indireto como indireto mesmo)
    pub fn has_data_blocks(&self) -> bool {
        matches!(self.ty_raw, 1 | 2)
    }

    pub fn to_bytes(&self) -> [u8; S5_INODE_SIZE] {
        let mut buf = [0u8; S5_INODE_SIZE];
        buf[0..4].copy_from_slice(&self.number.to_le_bytes());
        buf[4..6].copy_from_slice(&self.ty_raw.to_le_bytes());
        buf[6..8].copy_from_slice(&self.linkcount.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        for (i, b) in self.direct.iter().enumerate() {
            buf[12 + i * 4..16 + i * 4].copy_from_slice(&b.to_le_bytes());
        }
        buf[124..128].copy_from_slice(&self.indirect.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> S5Inode {
        debug_assert!(buf.len() >= S5_INODE_SIZE);
        let mut direct = [0u32; S5_NDIRECT_BLOCKS];
        for (i, b) in direct.iter_mut().enumerate() {
            *b = u32::from_le_bytes([
                buf[12 + i * 4],
                buf[13 + i * 4],
                buf[14 + i * 4],
                buf[15 + i * 4],
            ]);
        }
        S5Inode {
            number: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            ty_raw: u16::from_le_bytes([buf[4], buf[5]]),
            linkcount: u16::from_le_bytes([buf[6], buf[7]]),
            size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            direct,
            indirect: u32::from_le_bytes([buf[124], buf[125], buf[126], buf[127]]),
        }
    }
}

impl S5fs {
    /// Lê o inode da tabela (página do dispositivo).
    pub(super) fn read_inode(&self, ino: u32) -> KResult<S5Inode> {
        let pf = self.block_page(s5_inode_block(ino))?;
        let off = s5_inode_offset(ino);
        let inode = pf.with_data(|d| S5Inode::from_bytes(&d[off..off + S5_INODE_SIZE]));
        debug_assert_eq!(inode.number, ino);
        Ok(inode)
    }

    /// Escreve o inode de volta e suja a página da tabela.
    pub(super) fn write_inode(&self, inode: &S5Inode) -> KResult<()> {
        let pf = self.block_page(s5_inode_block(inode.number))?;
        let off = s5_inode_offset(inode.number);
        pf.with_data_mut(|d| d[off..off + S5_INODE_SIZE].copy_from_slice(&inode.to_bytes()));
        pframe::dirty(&pf)
    }

    /// Tira um inode da cabeça da lista livre e o inicializa.
    /// CHR/BLK guardam o devid no campo indireto.
    pub(super) fn alloc_inode(&self, ty: S5Type, devid: u32) -> KResult<u32> {
        debug_assert!(ty != S5Type::Free);
        let _g = self.fsmutex.guard();

        let head = self.sb.lock().free_inode;
        if head == S5_FREE_SENTINEL {
            return Err(Errno::ENOSPC);
        }

        let mut inode = self.read_inode(head)?;
        debug_assert_eq!(inode.ty_raw, S5Type::Free as u16);

        // remove da lista livre
        self.sb.lock().free_inode = inode.indirect;
        self.write_super()?;

        inode.ty_raw = ty as u16;
        inode.linkcount = 0;
        inode.size = 0;
        inode.direct = [0u32; S5_NDIRECT_BLOCKS];
        inode.indirect = match ty {
            S5Type::Chr | S5Type::Blk => devid,
            _ => 0,
        };
        self.write_inode(&inode)?;

        Ok(head)
    }

    /// Libera os blocos do inode (diretos, indireto e apontados) e o
    /// devolve à lista livre.
    pub(super) fn free_inode(&self, ino: u32) -> KResult<()> {
        let mut inode = self.read_inode(ino)?;
        debug_assert!(inode.ty_raw != S5Type::Free as u16);

        for i in 0..S5_NDIRECT_BLOCKS {
            let b = inode.direct[i];
            if b != 0 {
                self.free_block(b)?;
                inode.direct[i] = 0;
            }
        }

        if inode.has_data_blocks() && inode.indirect != 0 {
            let pf = self.block_page(inode.indirect as usize)?;
            let entries = pf.with_data(|d| {
                let mut e = alloc::vec![0u32; S5_NIDIRECT_BLOCKS];
                for (i, v) in e.iter_mut().enumerate() {
                    *v = u32::from_le_bytes([d[i * 4], d[i * 4 + 1], d[i * 4 + 2], d[i * 4 + 3]]);
                }
                e
            });
            for b in entries {
                debug_assert!(b != inode.indirect);
                if b != 0 {
                    self.free_block(b)?;
                }
            }
            self.free_block(inode.indirect)?;
        }

        inode.ty_raw = S5Type::Free as u16;
        inode.size = 0;

        {
            let _g = self.fsmutex.guard();
            let mut sb = self.sb.lock();
            inode.indirect = sb.free_inode;
            sb.free_inode = ino;
            drop(sb);
            self.write_super()?;
        }
        self.write_inode(&inode)?;

        log::debug!("(S5FS) inode {} liberado", ino);
        Ok(())
    }

    /// Bloco de disco correspondente à posição `pos` do arquivo.
    ///
    /// Bloco esparso com `alloc=false` devolve 0; com `alloc=true` o bloco
    /// (e o indireto, se preciso) é alocado e registrado no inode.
    pub(super) fn seek_to_block(&self, vno: u32, pos: usize, alloc: bool) -> KResult<u32> {
        let fileblock = pos / S5_BLOCK_SIZE;
        if fileblock >= S5_MAX_FILE_BLOCKS {
            return Err(Errno::EINVAL);
        }

        let mut inode = self.read_inode(vno)?;
        debug_assert!(inode.ty_raw != S5Type::Free as u16);

        if fileblock < S5_NDIRECT_BLOCKS {
            let blockno = inode.direct[fileblock];
            if blockno != 0 {
                return Ok(blockno);
            }
            if !alloc {
                return Ok(0);
            }
            let newb = self.alloc_block()?;
            inode.direct[fileblock] = newb;
            self.write_inode(&inode)?;
            return Ok(newb);
        }

        // faixa indireta: só arquivos e diretórios
        if !inode.has_data_blocks() {
            return Err(Errno::EINVAL);
        }
        let idx = fileblock - S5_NDIRECT_BLOCKS;

        if inode.indirect == 0 {
            if !alloc {
                return Ok(0);
            }
            // alocar o indireto (zerado: conteúdo herdado do disco não vale)
            let ib = self.alloc_block()?;
            let pf = self.block_page(ib as usize)?;
            pf.zero();

            let datab = match self.alloc_block() {
                Ok(b) => b,
                Err(e) => {
                    self.free_block(ib)?;
                    return Err(e);
                }
            };

            pf.with_data_mut(|d| d[idx * 4..idx * 4 + 4].copy_from_slice(&datab.to_le_bytes()));
            pframe::dirty(&pf)?;

            inode.indirect = ib;
            self.write_inode(&inode)?;
            return Ok(datab);
        }

        let pf = self.block_page(inode.indirect as usize)?;
        let blockno = pf.with_data(|d| {
            u32::from_le_bytes([d[idx * 4], d[idx * 4 + 1], d[idx * 4 + 2], d[idx * 4 + 3]])
        });
        if blockno != 0 {
            return Ok(blockno);
        }
        if !alloc {
            return Ok(0);
        }

        let datab = self.alloc_block()?;
        pf.with_data_mut(|d| d[idx * 4..idx * 4 + 4].copy_from_slice(&datab.to_le_bytes()));
        pframe::dirty(&pf)?;
        Ok(datab)
    }

    /// Lê até `buf.len()` bytes a partir de `seek`, pelas páginas do vnode.
    /// Buracos leem zeros; além do fim lê menos (0 = EOF).
    pub(super) fn read_file(&self, vn: &Arc<Vnode>, seek: usize, buf: &mut [u8]) -> KResult<usize> {
        let size = vn.len();
        if seek >= size {
            return Ok(0);
        }
        let len = core::cmp::min(buf.len(), size - seek);

        let mut done = 0;
        while done < len {
            let pos = seek + done;
            let pf = pframe::get(vn.mmobj(), pos / S5_BLOCK_SIZE)?;
            let poff = pos % S5_BLOCK_SIZE;
            let chunk = core::cmp::min(S5_BLOCK_SIZE - poff, len - done);
            pf.with_data(|d| buf[done..done + chunk].copy_from_slice(&d[poff..poff + chunk]));
            done += chunk;
        }
        Ok(len)
    }

    /// Escreve `buf` a partir de `seek`. Escrever num buraco aloca o bloco;
    /// escrever além do fim estende o arquivo (deixando buracos no meio).
    pub(super) fn write_file(&self, vn: &Arc<Vnode>, seek: usize, buf: &[u8]) -> KResult<usize> {
        if seek >= S5_MAX_FILE_SIZE {
            return Err(Errno::EINVAL);
        }
        let len = core::cmp::min(buf.len(), S5_MAX_FILE_SIZE - seek);
        if len == 0 {
            return Ok(0);
        }

        let mut done = 0;
        while done < len {
            let pos = seek + done;
            let pf = pframe::get(vn.mmobj(), pos / S5_BLOCK_SIZE)?;
            let poff = pos % S5_BLOCK_SIZE;
            let chunk = core::cmp::min(S5_BLOCK_SIZE - poff, len - done);
            pf.with_data_mut(|d| d[poff..poff + chunk].copy_from_slice(&buf[done..done + chunk]));
            pframe::dirty(&pf)?;
            done += chunk;
        }

        // estender o arquivo, mantendo inode e vnode em dia juntos
        let end = seek + len;
        if end > vn.len() {
            let mut inode = self.read_inode(vn.vno())?;
            debug_assert_eq!(inode.size as usize, vn.len());
            inode.size = end as u32;
            self.write_inode(&inode)?;
            vn.set_len(end);
        }

        Ok(len)
    }

    /// Blocos alocados em disco pelo inode (inclui o indireto, não inclui
    /// buracos). Usado pelo stat.
    pub(super) fn inode_blocks(&self, inode: &S5Inode) -> KResult<usize> {
        let mut count = inode.direct.iter().filter(|&&b| b != 0).count();

        if inode.has_data_blocks() && inode.indirect != 0 {
            count += 1;
            let pf = self.block_page(inode.indirect as usize)?;
            count += pf.with_data(|d| {
                (0..S5_NIDIRECT_BLOCKS)
                    .filter(|i| {
                        u32::from_le_bytes([
                            d[i * 4],
                            d[i * 4 + 1],
                            d[i * 4 + 2],
                            d[i * 4 + 3],
                        ]) != 0
                    })
                    .count()
            });
        }
        Ok(count)
    }
}
