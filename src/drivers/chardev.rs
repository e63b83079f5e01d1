//! Dispositivos de caractere.

use crate::sync::Spinlock;
use crate::sys::{DeviceId, KResult, MEM_NULL_DEVID, MEM_ZERO_DEVID};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

/// Trait para dispositivos de caractere (leitura/escrita de bytes).
pub trait ByteDevice: Send + Sync {
    /// Lê até `buf.len()` bytes; retorna quantos leu (0 = EOF).
    fn read(&self, offset: usize, buf: &mut [u8]) -> KResult<usize>;

    /// Escreve `buf`; retorna quantos bytes consumiu.
    fn write(&self, offset: usize, buf: &[u8]) -> KResult<usize>;
}

static CHARDEVS: Spinlock<BTreeMap<DeviceId, Arc<dyn ByteDevice>>> =
    Spinlock::new(BTreeMap::new());

pub fn chardev_register(id: DeviceId, dev: Arc<dyn ByteDevice>) {
    log::info!("(CharDev) registrado {}:{}", id.major(), id.minor());
    CHARDEVS.lock().insert(id, dev);
}

pub fn chardev_lookup(id: DeviceId) -> Option<Arc<dyn ByteDevice>> {
    CHARDEVS.lock().get(&id).cloned()
}

/// /dev/null: leitura é EOF imediato, escrita descarta tudo.
pub struct NullDev;

impl ByteDevice for NullDev {
    fn read(&self, _offset: usize, _buf: &mut [u8]) -> KResult<usize> {
        Ok(0)
    }

    fn write(&self, _offset: usize, buf: &[u8]) -> KResult<usize> {
        Ok(buf.len())
    }
}

/// /dev/zero: leitura devolve zeros, escrita descarta.
pub struct ZeroDev;

impl ByteDevice for ZeroDev {
    fn read(&self, _offset: usize, buf: &mut [u8]) -> KResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, _offset: usize, buf: &[u8]) -> KResult<usize> {
        Ok(buf.len())
    }
}

/// Registra os dispositivos de memória padrão.
pub fn chardev_init() {
    chardev_register(MEM_NULL_DEVID, Arc::new(NullDev));
    chardev_register(MEM_ZERO_DEVID, Arc::new(ZeroDev));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_dev() {
        let dev = NullDev;
        let mut buf = [1u8; 8];
        assert_eq!(dev.read(0, &mut buf).unwrap(), 0);
        assert_eq!(dev.write(0, &buf).unwrap(), 8);
    }

    #[test]
    fn test_zero_dev() {
        let dev = ZeroDev;
        let mut buf = [1u8; 8];
        assert_eq!(dev.read(0, &mut buf).unwrap(), 8);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
