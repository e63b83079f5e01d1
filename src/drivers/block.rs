//! # Camada de Abstração de Dispositivos de Bloco
//!
//! ## Arquitetura
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              FILESYSTEM (S5FS)              │
//! └─────────────────────────────────────────────┘
//!                       ↓
//! ┌─────────────────────────────────────────────┐
//! │          mmobj BlockDev (page cache)        │
//! └─────────────────────────────────────────────┘
//!                       ↓
//! ┌─────────────────────────────────────────────┐
//! │              BlockDevice trait              │
//! │      read_block() write_block() blocks()    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Os blocos têm o tamanho de uma página: um bloco = uma entrada no cache
//! de pframes do objeto do dispositivo. Todo o I/O do S5FS e o acesso cru
//! ao disco passam pelo mesmo cache (coerência por construção).

use crate::mm::mmobj::MemObj;
use crate::mm::PAGE_SIZE;
use crate::sync::Spinlock;
use crate::sys::{DeviceId, Errno, KResult};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

/// Trait para dispositivos de bloco.
///
/// `buf` deve ter comprimento múltiplo do tamanho de bloco; uma chamada com
/// buffer de N blocos transfere os blocos `[block, block+N)`.
pub trait BlockDevice: Send + Sync {
    /// Lê blocos a partir de `block` para `buf`. Pode bloquear.
    fn read_block(&self, block: usize, buf: &mut [u8]) -> KResult<()>;

    /// Escreve blocos a partir de `block`. Pode bloquear.
    fn write_block(&self, block: usize, buf: &[u8]) -> KResult<()>;

    /// Número total de blocos do dispositivo
    fn blocks(&self) -> usize;
}

/// Dispositivo de bloco registrado: o driver mais o objeto de memória que
/// serve de cache de páginas para ele.
pub struct BDev {
    pub id: DeviceId,
    pub dev: Arc<dyn BlockDevice>,
    pub obj: Arc<MemObj>,
}

static BLOCKDEVS: Spinlock<BTreeMap<DeviceId, Arc<BDev>>> = Spinlock::new(BTreeMap::new());

/// Registra um dispositivo de bloco, criando seu objeto de cache.
pub fn blockdev_register(id: DeviceId, dev: Arc<dyn BlockDevice>) -> Arc<BDev> {
    let bdev = Arc::new(BDev {
        id,
        obj: MemObj::new_blockdev(dev.clone()),
        dev,
    });
    log::info!(
        "(BlockDev) registrado {}:{} ({} blocos)",
        id.major(),
        id.minor(),
        bdev.dev.blocks()
    );
    BLOCKDEVS.lock().insert(id, bdev.clone());
    bdev
}

/// Busca um dispositivo registrado.
pub fn blockdev_lookup(id: DeviceId) -> Option<Arc<BDev>> {
    BLOCKDEVS.lock().get(&id).cloned()
}

/// Remove um dispositivo do registro (testes/umount de dispositivos).
pub fn blockdev_unregister(id: DeviceId) -> Option<Arc<BDev>> {
    BLOCKDEVS.lock().remove(&id)
}

/// Disco em memória: backing dos testes e do disco raiz padrão.
pub struct RamDisk {
    data: Spinlock<Vec<u8>>,
    nblocks: usize,
}

impl RamDisk {
    pub fn new(nblocks: usize) -> Self {
        Self {
            data: Spinlock::new(vec![0u8; nblocks * PAGE_SIZE]),
            nblocks,
        }
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block: usize, buf: &mut [u8]) -> KResult<()> {
        if buf.len() % PAGE_SIZE != 0 {
            return Err(Errno::EINVAL);
        }
        let count = buf.len() / PAGE_SIZE;
        if block + count > self.nblocks {
            return Err(Errno::EINVAL);
        }
        let data = self.data.lock();
        let start = block * PAGE_SIZE;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_block(&self, block: usize, buf: &[u8]) -> KResult<()> {
        if buf.len() % PAGE_SIZE != 0 {
            return Err(Errno::EINVAL);
        }
        let count = buf.len() / PAGE_SIZE;
        if block + count > self.nblocks {
            return Err(Errno::EINVAL);
        }
        let mut data = self.data.lock();
        let start = block * PAGE_SIZE;
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn blocks(&self) -> usize {
        self.nblocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramdisk_roundtrip() {
        let disk = RamDisk::new(4);
        let mut out = vec![0u8; PAGE_SIZE];
        let mut input = vec![0u8; PAGE_SIZE];
        input[0] = 0xAB;
        input[PAGE_SIZE - 1] = 0xCD;

        disk.write_block(2, &input).unwrap();
        disk.read_block(2, &mut out).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_ramdisk_bounds() {
        let disk = RamDisk::new(2);
        let mut buf = vec![0u8; PAGE_SIZE];
        assert_eq!(disk.read_block(2, &mut buf), Err(Errno::EINVAL));
        assert_eq!(disk.read_block(5, &mut buf), Err(Errno::EINVAL));
        // buffer não múltiplo de bloco
        let mut small = [0u8; 100];
        assert_eq!(disk.read_block(0, &mut small), Err(Errno::EINVAL));
    }

    #[test]
    fn test_registry() {
        let id = DeviceId::new(9, 42);
        let bdev = blockdev_register(id, Arc::new(RamDisk::new(2)));
        let found = blockdev_lookup(id).unwrap();
        assert!(Arc::ptr_eq(&bdev, &found));
        blockdev_unregister(id);
        assert!(blockdev_lookup(id).is_none());
    }
}
