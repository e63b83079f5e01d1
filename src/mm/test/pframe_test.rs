//! Testes do cache de pframes: identidade, preenchimento, dirty/clean e
//! contabilidade de residentes.

use crate::drivers::block::{BlockDevice, RamDisk};
use crate::mm::mmobj::{self, MemObj};
use crate::mm::{pframe, PAGE_SIZE};
use alloc::sync::Arc;
use alloc::vec;

#[test]
fn test_same_key_same_frame() {
    let obj = MemObj::new_anon();
    let a = pframe::get(&obj, 3).unwrap();
    let b = pframe::get(&obj, 3).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    // página diferente, frame diferente
    let c = pframe::get(&obj, 4).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    mmobj::put(&obj);
}

#[test]
fn test_anon_fill_zeroes_and_pins() {
    let obj = MemObj::new_anon();
    let pf = pframe::get(&obj, 0).unwrap();

    pf.with_data(|d| assert!(d.iter().all(|&b| b == 0)));
    assert_eq!(pf.pincount(), 1);
    mmobj::put(&obj);
}

#[test]
fn test_resident_accounting_invariant() {
    let obj = MemObj::new_anon();
    assert_eq!(obj.refcount(), 1);
    assert_eq!(obj.nrespages(), 0);

    let _a = pframe::get(&obj, 0).unwrap();
    let _b = pframe::get(&obj, 1).unwrap();

    // cada residente segura uma referência: nrespages <= refcount sempre
    assert_eq!(obj.nrespages(), 2);
    assert_eq!(obj.refcount(), 3);
    assert!(obj.nrespages() <= obj.refcount());
    mmobj::put(&obj);
}

#[test]
fn test_anon_put_reclaims_pages() {
    let obj = MemObj::new_anon();
    let id = obj.id();
    let _ = pframe::get(&obj, 0).unwrap();
    let _ = pframe::get(&obj, 7).unwrap();
    assert_eq!(obj.nrespages(), 2);

    // última referência externa: anônimo descarta as páginas e morre
    mmobj::put(&obj);
    assert_eq!(obj.nrespages(), 0);
    assert_eq!(obj.refcount(), 0);

    // nada daquele objeto sobrou no cache
    assert!(pframe::get_resident(&obj, 0).is_none());
    let _ = id;
}

#[test]
fn test_blockdev_fill_and_clean() {
    let disk = Arc::new(RamDisk::new(8));
    let mut block = vec![0u8; PAGE_SIZE];
    block[0] = 0x5A;
    block[100] = 0xA5;
    disk.write_block(2, &block).unwrap();

    let obj = MemObj::new_blockdev(disk.clone());

    // fill lê o bloco do dispositivo
    let pf = pframe::get(&obj, 2).unwrap();
    pf.with_data(|d| {
        assert_eq!(d[0], 0x5A);
        assert_eq!(d[100], 0xA5);
    });

    // escrita + clean volta para o disco
    pf.with_data_mut(|d| d[0] = 0x77);
    pframe::dirty(&pf).unwrap();
    assert!(pf.is_dirty());
    pframe::clean(&pf).unwrap();
    assert!(!pf.is_dirty());

    let mut out = vec![0u8; PAGE_SIZE];
    disk.read_block(2, &mut out).unwrap();
    assert_eq!(out[0], 0x77);
    assert_eq!(out[100], 0xA5);
}

#[test]
fn test_get_resident_is_non_allocating() {
    let obj = MemObj::new_anon();
    assert!(pframe::get_resident(&obj, 5).is_none());
    assert_eq!(obj.nrespages(), 0);

    let pf = pframe::get(&obj, 5).unwrap();
    let res = pframe::get_resident(&obj, 5).unwrap();
    assert!(Arc::ptr_eq(&pf, &res));
    mmobj::put(&obj);
}

#[test]
fn test_clean_all_writes_back() {
    let disk = Arc::new(RamDisk::new(4));
    let obj = MemObj::new_blockdev(disk.clone());

    for b in 0..3 {
        let pf = pframe::get(&obj, b).unwrap();
        pf.with_data_mut(|d| d[0] = b as u8 + 1);
        pframe::dirty(&pf).unwrap();
    }
    pframe::clean_all(&obj).unwrap();

    let mut out = vec![0u8; PAGE_SIZE];
    for b in 0..3usize {
        disk.read_block(b, &mut out).unwrap();
        assert_eq!(out[0], b as u8 + 1);
    }
}
