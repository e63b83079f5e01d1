//! Dispositivos.
//!
//! Dois contratos, cada um com seu registro indexado por `DeviceId`:
//!
//! - bloco (`BlockDevice`): blocos do tamanho de página, com um objeto de
//!   memória de cache por dispositivo;
//! - caractere (`ByteDevice`): leitura/escrita de bytes.

pub mod block;
pub mod chardev;
