//! File mappings: faults resolving through vnode, memory object, and page
//! cache.

mod common;

use bedrock::addressing::{Va, PAGE_SIZE};
use bedrock::interrupt::Registers;
use osmium::{
    syscall::{
        self,
        flags::{MapFlags, OpenFlags, Prot},
    },
    KernelError,
};

fn create_file(p: &mut osmium::proc::Process, path: &str, contents: &[u8]) {
    let fd = syscall::do_open(p, path, OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    syscall::do_write(p, fd, contents).unwrap();
    syscall::do_close(p, fd).unwrap();
}

#[test]
fn shared_file_mapping_is_coherent_between_processes() {
    let fx = common::fresh_fs(64, 16);
    let mut a = common::process_on(&fx.root);
    let mut b = common::process_on(&fx.root);

    create_file(&mut a, "/shared", &[0u8; PAGE_SIZE]);

    let map_in = |p: &mut osmium::proc::Process| {
        let fd = syscall::do_open(p, "/shared", OpenFlags::RDWR).unwrap();
        syscall::do_mmap(
            p,
            0,
            PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MapFlags::SHARED,
            fd.0,
            0,
        )
        .unwrap()
    };
    let addr_a = map_in(&mut a);
    let addr_b = map_in(&mut b);

    // A write by one process is observable by the other on its next
    // fault.
    a.mm.copy_out(Va::new(addr_a).unwrap(), b"ping").unwrap();
    let mut seen = [0u8; 4];
    b.mm.copy_in(Va::new(addr_b).unwrap(), &mut seen).unwrap();
    assert_eq!(&seen, b"ping");

    b.mm.copy_out(Va::new(addr_b + 8).unwrap(), b"pong").unwrap();
    a.mm.copy_in(Va::new(addr_a + 8).unwrap(), &mut seen).unwrap();
    assert_eq!(&seen, b"pong");
}

#[test]
fn shared_mapping_writes_reach_the_file() {
    let fx = common::fresh_fs(64, 16);
    let mut p = common::process_on(&fx.root);

    create_file(&mut p, "/data", &[0u8; PAGE_SIZE]);
    let fd = syscall::do_open(&mut p, "/data", OpenFlags::RDWR).unwrap();
    let addr = syscall::do_mmap(
        &mut p,
        0,
        PAGE_SIZE,
        Prot::READ | Prot::WRITE,
        MapFlags::SHARED,
        fd.0,
        0,
    )
    .unwrap();

    p.mm.copy_out(Va::new(addr).unwrap(), b"written through the map")
        .unwrap();

    // read() goes through the same page cache frames.
    let mut back = [0u8; 23];
    syscall::do_read(&mut p, fd, &mut back).unwrap();
    assert_eq!(&back, b"written through the map");

    // And writeback makes it durable.
    osmium::fs::traits::FileSystem::sync(&fx.fs).unwrap();
    let mut raw = [0u8; osmium::dev::BLOCK_SIZE];
    let mut found = false;
    for blockno in 0..64 {
        osmium::dev::BlockDevice::read_block(&fx.disk, blockno, &mut raw).unwrap();
        if raw.starts_with(b"written through the map") {
            found = true;
            break;
        }
    }
    assert!(found);
}

#[test]
fn private_file_mapping_keeps_writes_off_the_file() {
    let fx = common::fresh_fs(64, 16);
    let mut p = common::process_on(&fx.root);

    let mut contents = vec![0u8; PAGE_SIZE];
    contents[..5].copy_from_slice(b"fixed");
    create_file(&mut p, "/ro", &contents);

    let fd = syscall::do_open(&mut p, "/ro", OpenFlags::empty()).unwrap();
    // PROT_WRITE on a private mapping needs no write permission on the
    // file.
    let addr = syscall::do_mmap(
        &mut p,
        0,
        PAGE_SIZE,
        Prot::READ | Prot::WRITE,
        MapFlags::PRIVATE,
        fd.0,
        0,
    )
    .unwrap();

    let va = Va::new(addr).unwrap();
    let mut seen = [0u8; 5];
    p.mm.copy_in(va, &mut seen).unwrap();
    assert_eq!(&seen, b"fixed");

    p.mm.copy_out(va, b"local").unwrap();
    p.mm.copy_in(va, &mut seen).unwrap();
    assert_eq!(&seen, b"local");

    // The file is untouched.
    syscall::do_seek(&mut p, fd, 0, osmium::fs::file::Whence::Set).unwrap();
    syscall::do_read(&mut p, fd, &mut seen).unwrap();
    assert_eq!(&seen, b"fixed");
}

#[test]
fn shared_write_needs_write_permission_on_the_file() {
    let fx = common::fresh_fs(64, 16);
    let mut p = common::process_on(&fx.root);
    create_file(&mut p, "/guarded", b"x");

    let fd = syscall::do_open(&mut p, "/guarded", OpenFlags::empty()).unwrap();
    assert_eq!(
        syscall::do_mmap(
            &mut p,
            0,
            PAGE_SIZE,
            Prot::READ | Prot::WRITE,
            MapFlags::SHARED,
            fd.0,
            0,
        ),
        Err(KernelError::InvalidAccess)
    );
    // Read-only shared mapping of the same descriptor is fine.
    syscall::do_mmap(&mut p, 0, PAGE_SIZE, Prot::READ, MapFlags::SHARED, fd.0, 0).unwrap();
}

#[test]
fn forked_private_file_mappings_diverge() {
    let fx = common::fresh_fs(64, 16);
    let mut parent = common::process_on(&fx.root);

    let mut contents = vec![0u8; PAGE_SIZE];
    contents[0] = b'0';
    create_file(&mut parent, "/cow", &contents);

    let fd = syscall::do_open(&mut parent, "/cow", OpenFlags::empty()).unwrap();
    let addr = syscall::do_mmap(
        &mut parent,
        0,
        PAGE_SIZE,
        Prot::READ | Prot::WRITE,
        MapFlags::PRIVATE,
        fd.0,
        0,
    )
    .unwrap();
    let va = Va::new(addr).unwrap();

    parent.mm.copy_out(va, b"A").unwrap();
    let mut child = parent.fork(&Registers::default()).unwrap();
    child.mm.copy_out(va, b"B").unwrap();

    let mut seen = [0u8; 1];
    parent.mm.copy_in(va, &mut seen).unwrap();
    assert_eq!(&seen, b"A");
    child.mm.copy_in(va, &mut seen).unwrap();
    assert_eq!(&seen, b"B");

    // Bytes the child never wrote still come from the shared history.
    let tail = Va::new(addr + 100).unwrap();
    child.mm.copy_in(tail, &mut seen).unwrap();
    assert_eq!(seen[0], contents[100]);
}

#[test]
fn boot_mount_resolves_the_root_disk() {
    let fx = common::fresh_fs(64, 16);
    let cmdline = format!("console=ttyS0 root=disk{}", fx.devid.minor());
    let (_fs, root) = s5fs::boot_mount(&cmdline).unwrap();
    assert!(root.is_dir());

    assert_eq!(
        s5fs::boot_mount("console=ttyS0").unwrap_err(),
        KernelError::NoSuchDevice
    );
}
