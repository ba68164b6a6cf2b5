//! File and directory semantics over a freshly formatted disk.

mod common;

use osmium::{
    fs::{file::Whence, VnodeKind},
    syscall::{self, flags::OpenFlags},
    KernelError,
};
use rand::{Rng, SeedableRng};

#[test]
fn write_then_read_round_trip() {
    let fx = common::fresh_fs(64, 32);
    let mut p = common::process_on(&fx.root);

    let fd = syscall::do_open(
        &mut p,
        "/notes",
        OpenFlags::RDWR | OpenFlags::CREAT,
    )
    .unwrap();
    let msg = b"the quick brown fox jumps over the lazy dog";
    assert_eq!(syscall::do_write(&mut p, fd, msg).unwrap(), msg.len());

    syscall::do_seek(&mut p, fd, 0, Whence::Set).unwrap();
    let mut back = vec![0u8; msg.len()];
    assert_eq!(syscall::do_read(&mut p, fd, &mut back).unwrap(), msg.len());
    assert_eq!(&back, msg);

    // Reads at EOF return zero bytes.
    assert_eq!(syscall::do_read(&mut p, fd, &mut back).unwrap(), 0);
    syscall::do_close(&mut p, fd).unwrap();
}

#[test]
fn random_data_survives_multi_block_files() {
    let fx = common::fresh_fs(96, 32);
    let mut p = common::process_on(&fx.root);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5f5);

    // Spill well past the direct blocks to exercise the indirect path.
    let len = 14 * 4096 + 123;
    let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

    let fd = syscall::do_open(&mut p, "/blob", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    assert_eq!(syscall::do_write(&mut p, fd, &data).unwrap(), len);

    syscall::do_seek(&mut p, fd, 0, Whence::Set).unwrap();
    let mut back = vec![0u8; len];
    assert_eq!(syscall::do_read(&mut p, fd, &mut back).unwrap(), len);
    assert_eq!(back, data);

    // One indirect block plus 15 data blocks.
    let st = syscall::do_stat(&p, "/blob").unwrap();
    assert_eq!(st.size, len);
    assert_eq!(st.blocks, 16);
    syscall::do_close(&mut p, fd).unwrap();
}

#[test]
fn sparse_files_read_zeros_and_stay_small() {
    let fx = common::fresh_fs(64, 32);
    let mut p = common::process_on(&fx.root);

    let fd = syscall::do_open(&mut p, "/sparse", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    syscall::do_seek(&mut p, fd, 8 * 4096, Whence::Set).unwrap();
    syscall::do_write(&mut p, fd, b"hi").unwrap();
    syscall::do_close(&mut p, fd).unwrap();

    let fd = syscall::do_open(&mut p, "/sparse", OpenFlags::empty()).unwrap();
    let mut back = vec![0xffu8; 8 * 4096 + 2];
    assert_eq!(
        syscall::do_read(&mut p, fd, &mut back).unwrap(),
        8 * 4096 + 2
    );
    assert!(back[..8 * 4096].iter().all(|&b| b == 0));
    assert_eq!(&back[8 * 4096..], b"hi");

    // One data block; the hole costs nothing.
    let st = syscall::do_stat(&p, "/sparse").unwrap();
    assert_eq!(st.size, 8 * 4096 + 2);
    assert!(st.blocks <= 2);
    syscall::do_close(&mut p, fd).unwrap();
}

#[test]
fn directory_link_count_law() {
    let fx = common::fresh_fs(64, 32);
    let p = common::process_on(&fx.root);

    let root_before = syscall::do_stat(&p, "/").unwrap().nlink;
    syscall::do_mkdir(&p, "/a").unwrap();
    assert_eq!(syscall::do_stat(&p, "/").unwrap().nlink, root_before + 1);
    assert_eq!(syscall::do_stat(&p, "/a").unwrap().nlink, 2);

    syscall::do_mkdir(&p, "/a/b").unwrap();
    assert_eq!(syscall::do_stat(&p, "/a").unwrap().nlink, 3);
    assert_eq!(syscall::do_stat(&p, "/a/b").unwrap().nlink, 2);

    syscall::do_rmdir(&p, "/a/b").unwrap();
    assert_eq!(syscall::do_stat(&p, "/a").unwrap().nlink, 2);
    assert_eq!(
        syscall::do_stat(&p, "/a/b"),
        Err(KernelError::NoSuchEntry)
    );

    osmium::fs::traits::FileSystem::check_refcounts(&fx.fs).unwrap();
}

#[test]
fn rmdir_semantics() {
    let fx = common::fresh_fs(64, 32);
    let mut p = common::process_on(&fx.root);

    syscall::do_mkdir(&p, "/d").unwrap();
    let fd = syscall::do_open(&mut p, "/d/f", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    syscall::do_close(&mut p, fd).unwrap();

    // Not empty while the file is linked.
    assert_eq!(
        syscall::do_rmdir(&p, "/d"),
        Err(KernelError::DirectoryNotEmpty)
    );
    syscall::do_unlink(&p, "/d/f").unwrap();
    syscall::do_rmdir(&p, "/d").unwrap();
    assert_eq!(
        syscall::do_stat(&p, "/d"),
        Err(KernelError::NoSuchEntry)
    );

    // A directory is not unlink's business, nor a file rmdir's.
    syscall::do_mkdir(&p, "/e").unwrap();
    assert_eq!(syscall::do_unlink(&p, "/e"), Err(KernelError::IsDirectory));
    let fd = syscall::do_open(&mut p, "/g", OpenFlags::CREAT).unwrap();
    syscall::do_close(&mut p, fd).unwrap();
    assert_eq!(syscall::do_rmdir(&p, "/g"), Err(KernelError::NotDirectory));
}

#[test]
fn hard_links_share_the_inode() {
    let fx = common::fresh_fs(64, 32);
    let mut p = common::process_on(&fx.root);

    let fd = syscall::do_open(&mut p, "/orig", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    syscall::do_write(&mut p, fd, b"shared bytes").unwrap();
    syscall::do_close(&mut p, fd).unwrap();

    syscall::do_link(&p, "/orig", "/alias").unwrap();
    let orig = syscall::do_stat(&p, "/orig").unwrap();
    let alias = syscall::do_stat(&p, "/alias").unwrap();
    assert_eq!(orig.ino, alias.ino);
    assert_eq!(orig.nlink, 3); // two entries + the live vnode

    // Dropping one name leaves the data reachable through the other.
    syscall::do_unlink(&p, "/orig").unwrap();
    let fd = syscall::do_open(&mut p, "/alias", OpenFlags::empty()).unwrap();
    let mut back = [0u8; 12];
    syscall::do_read(&mut p, fd, &mut back).unwrap();
    assert_eq!(&back, b"shared bytes");
    syscall::do_close(&mut p, fd).unwrap();
}

#[test]
fn vnodes_are_unique_per_inode() {
    let fx = common::fresh_fs(64, 32);
    let p = common::process_on(&fx.root);

    syscall::do_mkdir(&p, "/dir").unwrap();
    let a = osmium::fs::path::lookup_namev(&p.cwd, &p.root, "/dir").unwrap();
    let b = osmium::fs::path::lookup_namev(&p.cwd, &p.root, "/dir").unwrap();
    assert!(a.ptr_eq(&b));
    assert!(a.ref_count() >= 2);

    // `.` and `..` resolve through the same table.
    let dot = osmium::fs::path::lookup_namev(&p.cwd, &p.root, "/dir/.").unwrap();
    assert!(dot.ptr_eq(&a));
    let up = osmium::fs::path::lookup_namev(&p.cwd, &p.root, "/dir/..").unwrap();
    assert!(up.ptr_eq(&p.root));
}

#[test]
fn readdir_lists_live_entries() {
    let fx = common::fresh_fs(64, 32);
    let mut p = common::process_on(&fx.root);

    syscall::do_mkdir(&p, "/sub").unwrap();
    let fd = syscall::do_open(&mut p, "/file", OpenFlags::CREAT).unwrap();
    syscall::do_close(&mut p, fd).unwrap();

    let mut names = Vec::new();
    let mut pos = 0;
    while let Some((next, entry)) = fx.root.readdir(pos).unwrap() {
        names.push(entry.name);
        pos = next;
    }
    names.sort();
    assert_eq!(names, [".", "..", "file", "sub"]);
}

#[test]
fn device_nodes_carry_their_device_id() {
    let fx = common::fresh_fs(64, 32);
    let p = common::process_on(&fx.root);

    let devid = osmium::dev::DevId::new(2, 0);
    syscall::do_mknod(&p, "/null", VnodeKind::CharDevice(devid)).unwrap();
    match syscall::do_stat(&p, "/null").unwrap().kind {
        VnodeKind::CharDevice(d) => assert_eq!(d, devid),
        other => panic!("wrong kind: {:?}", other),
    }

    // The fixture's own disk, as a block node.
    syscall::do_mknod(&p, "/disk", VnodeKind::BlockDevice(fx.devid)).unwrap();
    match syscall::do_stat(&p, "/disk").unwrap().kind {
        VnodeKind::BlockDevice(d) => assert_eq!(d, fx.devid),
        other => panic!("wrong kind: {:?}", other),
    }
}

#[test]
fn descriptor_table_fills_up() {
    let fx = common::fresh_fs(64, 64);
    let mut p = common::process_on(&fx.root);

    let fd = syscall::do_open(&mut p, "/f", OpenFlags::CREAT).unwrap();
    let mut opened = vec![fd];
    loop {
        match syscall::do_dup(&mut p, fd) {
            Ok(fd) => opened.push(fd),
            Err(KernelError::TooManyOpenFile) => break,
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert_eq!(opened.len(), osmium::fs::file::NFILES);
    for fd in opened {
        syscall::do_close(&mut p, fd).unwrap();
    }
}
