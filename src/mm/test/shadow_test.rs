//! Testes de shadow objects: fall-through de leitura, cópia na escrita e o
//! protocolo de reclamação da cadeia.

use crate::mm::mmobj::{self, MemObj};
use crate::mm::pframe;
use alloc::sync::Arc;

/// Escreve um byte na página `n` de `obj` via lookuppage(forwrite).
fn write_byte(obj: &Arc<MemObj>, n: usize, off: usize, val: u8) {
    let pf = mmobj::lookuppage(obj, n, true).unwrap();
    pf.with_data_mut(|d| d[off] = val);
    pframe::dirty(&pf).unwrap();
}

fn read_byte(obj: &Arc<MemObj>, n: usize, off: usize) -> u8 {
    let pf = mmobj::lookuppage(obj, n, false).unwrap();
    pf.with_data(|d| d[off])
}

#[test]
fn test_bottom_obj() {
    let anon = MemObj::new_anon();
    assert!(Arc::ptr_eq(&mmobj::bottom_obj(&anon), &anon));

    let shadow = mmobj::shadow_wrap(anon.clone());
    assert!(Arc::ptr_eq(&mmobj::bottom_obj(&shadow), &anon));

    // shadow de shadow continua apontando o mesmo fundo
    mmobj::ref_obj(&shadow);
    let shadow2 = mmobj::shadow_wrap(shadow.clone());
    assert!(Arc::ptr_eq(&mmobj::bottom_obj(&shadow2), &anon));

    mmobj::put(&shadow2);
    mmobj::put(&shadow);
}

#[test]
fn test_read_falls_through_to_bottom() {
    let anon = MemObj::new_anon();
    write_byte(&anon, 0, 10, 0xAA);

    let shadow = mmobj::shadow_wrap(anon.clone());
    // leitura através do shadow enxerga o fundo sem copiar
    assert_eq!(read_byte(&shadow, 0, 10), 0xAA);
    assert_eq!(shadow.nrespages(), 0);

    mmobj::put(&shadow);
}

#[test]
fn test_write_copies_into_shadow() {
    let anon = MemObj::new_anon();
    write_byte(&anon, 0, 10, 0xAA);

    let shadow = mmobj::shadow_wrap(anon.clone());
    write_byte(&shadow, 0, 10, 0xBB);

    // a cópia privada mudou; o fundo ficou intacto
    assert_eq!(read_byte(&shadow, 0, 10), 0xBB);
    assert_eq!(
        pframe::get_resident(&anon, 0).unwrap().with_data(|d| d[10]),
        0xAA
    );
    assert_eq!(shadow.nrespages(), 1);

    mmobj::put(&shadow);
}

#[test]
fn test_two_shadows_isolated() {
    // o cenário do fork: dois shadows sobre o mesmo objeto compartilhado
    let shared = MemObj::new_anon();
    write_byte(&shared, 0, 0, 1);

    mmobj::ref_obj(&shared); // a segunda cadeia precisa da própria referência
    let left = mmobj::shadow_wrap(shared.clone());
    let right = mmobj::shadow_wrap(shared.clone());

    // antes de qualquer escrita, os dois leem o mesmo
    assert_eq!(read_byte(&left, 0, 0), 1);
    assert_eq!(read_byte(&right, 0, 0), 1);

    // escrita de um lado não aparece do outro
    write_byte(&left, 0, 0, 2);
    assert_eq!(read_byte(&left, 0, 0), 2);
    assert_eq!(read_byte(&right, 0, 0), 1);

    write_byte(&right, 0, 0, 3);
    assert_eq!(read_byte(&right, 0, 0), 3);
    assert_eq!(read_byte(&left, 0, 0), 2);

    mmobj::put(&left);
    mmobj::put(&right);
}

#[test]
fn test_shadow_fill_copies_nearest_ancestor() {
    let anon = MemObj::new_anon();
    write_byte(&anon, 0, 0, 10);

    let mid = mmobj::shadow_wrap(anon.clone());
    write_byte(&mid, 0, 0, 20);

    mmobj::ref_obj(&mid);
    let top = mmobj::shadow_wrap(mid.clone());

    // o ancestral mais próximo com a página é `mid`, não o fundo
    write_byte(&top, 0, 0, 30);
    assert_eq!(read_byte(&top, 0, 0), 30);
    assert_eq!(read_byte(&mid, 0, 0), 20);
    assert_eq!(read_byte(&anon, 0, 0), 10);

    mmobj::put(&top);
    mmobj::put(&mid);
}

#[test]
fn test_shadow_put_releases_chain() {
    let anon = MemObj::new_anon();
    let rc_anon_alone = anon.refcount();

    let shadow = mmobj::shadow_wrap(anon.clone());
    write_byte(&shadow, 0, 0, 9);
    assert_eq!(shadow.nrespages(), 1);

    // derrubar a última referência externa: páginas somem e a cadeia solta
    // shadowed + bottom
    mmobj::put(&shadow);
    assert_eq!(shadow.refcount(), 0);
    assert_eq!(shadow.nrespages(), 0);
    // o anon perdeu as duas referências que a cadeia segurava... menos a que
    // o chamador transferiu ao criar o shadow
    assert_eq!(anon.refcount(), rc_anon_alone - 1);
}
