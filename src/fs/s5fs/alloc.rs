//! Alocação de blocos: a lista livre embutida no superbloco, com
//! continuação encadeada.
//!
//! O array `free_blocks` guarda até `S5_NBLKS_PER_FNODE` números; a última
//! entrada aponta o bloco que contém o próximo lote (ou o sentinela). Ao
//! esvaziar o array, o bloco de continuação é consumido: seu conteúdo vira o
//! array novo e o próprio bloco é o alocado. Ao encher, o array inteiro é
//! despejado no bloco recém-liberado, que vira a nova cabeça da cadeia.

use super::{S5fs, S5_FREE_SENTINEL, S5_NBLKS_PER_FNODE};
use crate::mm::pframe;
use crate::sys::{Errno, KResult};

impl S5fs {
    /// Tira um bloco da lista livre. ENOSPC quando não há mais nenhum.
    /// O conteúdo do bloco devolvido é indefinido.
    pub(super) fn alloc_block(&self) -> KResult<u32> {
        let _g = self.fsmutex.guard();

        let (nfree, chain) = {
            let sb = self.sb.lock();
            (sb.nfree, sb.free_blocks[S5_NBLKS_PER_FNODE - 1])
        };

        let blockno = if nfree == 0 {
            if chain == S5_FREE_SENTINEL {
                log::warn!("(S5FS) sem blocos livres");
                return Err(Errno::ENOSPC);
            }
            // consumir o bloco de continuação: o conteúdo dele vira o array
            // embutido e ele próprio é o bloco alocado
            let pf = self.block_page(chain as usize)?;
            let entries = pf.with_data(|d| {
                let mut e = [0u32; S5_NBLKS_PER_FNODE];
                for (i, v) in e.iter_mut().enumerate() {
                    *v = u32::from_le_bytes([d[i * 4], d[i * 4 + 1], d[i * 4 + 2], d[i * 4 + 3]]);
                }
                e
            });
            {
                let mut sb = self.sb.lock();
                sb.free_blocks = entries;
                sb.nfree = (S5_NBLKS_PER_FNODE - 1) as u32;
            }
            chain
        } else {
            let mut sb = self.sb.lock();
            sb.nfree -= 1;
            let b = sb.free_blocks[sb.nfree as usize];
            drop(sb);
            b
        };

        self.write_super()?;
        debug_assert!(blockno != 0);
        log::trace!("(S5FS) bloco {} alocado", blockno);
        Ok(blockno)
    }

    /// Devolve um bloco à lista livre.
    ///
    /// O chamador garante que o bloco está de fato livre e sem páginas
    /// residentes no cache do dispositivo apontando conteúdo válido.
    pub(super) fn free_block(&self, blockno: u32) -> KResult<()> {
        debug_assert!(blockno != 0);
        let _g = self.fsmutex.guard();

        let full = {
            let sb = self.sb.lock();
            debug_assert!((sb.nfree as usize) < S5_NBLKS_PER_FNODE);
            sb.nfree as usize == S5_NBLKS_PER_FNODE - 1
        };

        if full {
            // array cheio: despejá-lo no bloco liberado e recomeçar
            let snapshot = self.sb.lock().free_blocks;
            let pf = self.block_page(blockno as usize)?;
            pf.with_data_mut(|d| {
                for (i, b) in snapshot.iter().enumerate() {
                    d[i * 4..i * 4 + 4].copy_from_slice(&b.to_le_bytes());
                }
            });
            pframe::dirty(&pf)?;

            let mut sb = self.sb.lock();
            sb.nfree = 0;
            sb.free_blocks[S5_NBLKS_PER_FNODE - 1] = blockno;
        } else {
            let mut sb = self.sb.lock();
            let n = sb.nfree as usize;
            sb.free_blocks[n] = blockno;
            sb.nfree += 1;
        }

        self.write_super()?;
        log::trace!("(S5FS) bloco {} liberado", blockno);
        Ok(())
    }
}
