//! Drives the process-wide allocator through one init/alloc/dealloc/finalize
//! cycle.
//!
//! Point `DAXALLOC_PATH` and `DAXALLOC_SIZE` at a real device to use it;
//! without them a temporary file stands in for the device.

use daxalloc::{STATUS_OK, global};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let backing = tempfile::NamedTempFile::new().unwrap();

    let status = if std::env::var_os("DAXALLOC_SIZE").is_some() {
        global::init_from_env()
    } else {
        backing.as_file().set_len(64 << 20).unwrap();
        global::init(backing.path(), 64 << 20)
    };

    if status != STATUS_OK {
        eprintln!("init failed with status {status}");
        std::process::exit(status);
    }

    let allocator = global::allocator();
    println!("Pool ready, largest allocation: {} bytes", allocator.capacity());

    let addr1 = global::alloc(8);
    log_alloc(addr1, 8);

    let addr2 = global::alloc(4096);
    log_alloc(addr2, 4096);

    let addr3 = global::alloc(0);
    log_alloc(addr3, 0);

    unsafe {
        global::dealloc(addr1);
        global::dealloc(addr2);
        global::dealloc(addr3);
    }

    println!("{:#?}", allocator.stats());
    global::finalize();
}
