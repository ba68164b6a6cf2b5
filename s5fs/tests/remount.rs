//! Persistence: what a mount writes, the next mount reads.

mod common;

use osmium::{
    fs::traits::FileSystem as _,
    syscall::{self, flags::OpenFlags},
};
use s5fs::S5FileSystem;

#[test]
fn tree_survives_unmount_and_remount() {
    let fx = common::fresh_fs(96, 32);
    let mut p = common::process_on(&fx.root);

    syscall::do_mkdir(&p, "/d1").unwrap();
    syscall::do_mkdir(&p, "/d1/d2").unwrap();
    let fd = syscall::do_open(&mut p, "/d1/f1", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    syscall::do_write(&mut p, fd, b"hello").unwrap();
    syscall::do_close(&mut p, fd).unwrap();
    let fd = syscall::do_open(&mut p, "/d1/d2/f2", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    syscall::do_write(&mut p, fd, b"world").unwrap();
    syscall::do_close(&mut p, fd).unwrap();

    drop(p);
    fx.fs.unmount().unwrap();

    // Second mount over the same device.
    let fs = S5FileSystem::mount(fx.devid).unwrap();
    fs.check_refcounts().unwrap();
    let root = fs.root().unwrap();
    let mut p = common::process_on(&root);

    let fd = syscall::do_open(&mut p, "/d1/f1", OpenFlags::empty()).unwrap();
    let mut buf = [0u8; 5];
    syscall::do_read(&mut p, fd, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
    syscall::do_close(&mut p, fd).unwrap();

    let fd = syscall::do_open(&mut p, "/d1/d2/f2", OpenFlags::empty()).unwrap();
    syscall::do_read(&mut p, fd, &mut buf).unwrap();
    assert_eq!(&buf, b"world");
    syscall::do_close(&mut p, fd).unwrap();

    drop(p);
    fs.unmount().unwrap();
}

#[test]
fn sparse_layout_survives_remount() {
    let fx = common::fresh_fs(64, 16);
    let mut p = common::process_on(&fx.root);

    let fd = syscall::do_open(&mut p, "/holes", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    syscall::do_seek(&mut p, fd, 8 * 4096, osmium::fs::file::Whence::Set).unwrap();
    syscall::do_write(&mut p, fd, b"hi").unwrap();
    syscall::do_close(&mut p, fd).unwrap();
    drop(p);
    fx.fs.unmount().unwrap();

    let fs = S5FileSystem::mount(fx.devid).unwrap();
    let root = fs.root().unwrap();
    let mut p = common::process_on(&root);
    let fd = syscall::do_open(&mut p, "/holes", OpenFlags::empty()).unwrap();
    let mut back = vec![0xaau8; 8 * 4096 + 2];
    assert_eq!(
        syscall::do_read(&mut p, fd, &mut back).unwrap(),
        8 * 4096 + 2
    );
    assert!(back[..8 * 4096].iter().all(|&b| b == 0));
    assert_eq!(&back[8 * 4096..], b"hi");

    let st = syscall::do_stat(&p, "/holes").unwrap();
    assert!(st.blocks <= 2);
    syscall::do_close(&mut p, fd).unwrap();
}

#[test]
fn freed_space_is_reusable_after_remount() {
    let fx = common::fresh_fs(48, 16);
    let mut p = common::process_on(&fx.root);

    let fd = syscall::do_open(&mut p, "/tmp", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    let chunk = vec![7u8; 10 * 4096];
    syscall::do_write(&mut p, fd, &chunk).unwrap();
    syscall::do_close(&mut p, fd).unwrap();
    syscall::do_unlink(&p, "/tmp").unwrap();
    drop(p);
    fx.fs.unmount().unwrap();

    // The blocks went back on the free list; a same-sized file fits.
    let fs = S5FileSystem::mount(fx.devid).unwrap();
    let root = fs.root().unwrap();
    let mut p = common::process_on(&root);
    let fd = syscall::do_open(&mut p, "/tmp2", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    assert_eq!(
        syscall::do_write(&mut p, fd, &chunk).unwrap(),
        chunk.len()
    );
    syscall::do_close(&mut p, fd).unwrap();
}
