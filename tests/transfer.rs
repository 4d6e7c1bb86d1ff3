//! Tagged transfers between a local store and main storage.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vecmath_offload::coproc::{LocalStore, Mfc, LOCAL_STORE_SIZE};
use vecmath_offload::coproc::mfc::MAX_TRANSFER_SIZE;
use vecmath_offload::error::DmaFault;
use vecmath_offload::memory::{EffectiveAddress, MainStorage};

struct Unit {
    storage: Arc<MainStorage>,
    local: Arc<LocalStore>,
    mfc: Mfc,
}

fn unit(storage_bytes: usize) -> Unit {
    let storage = MainStorage::new(storage_bytes).unwrap();
    let local = Arc::new(LocalStore::new().unwrap());
    let mfc = Mfc::spawn(0, Arc::clone(&local), Arc::clone(&storage)).unwrap();
    Unit { storage, local, mfc }
}

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random::<u8>()).collect()
}

#[test]
fn test_one_wait_covers_every_transfer_on_a_tag() {
    let u = unit(8192);
    let block = u.storage.allocate(4096, 128).unwrap();
    let pattern = random_bytes(4096, 12345);
    u.storage.write(block, &pattern).unwrap();

    for chunk in 0..256u32 {
        let offset = chunk * 16;
        u.mfc.get(0x1000 + offset, block.offset(offset as u64), 16, 7).unwrap();
    }
    u.mfc.wait(7).unwrap();
    assert_eq!(u.mfc.outstanding(7), 0);

    let mut copy = vec![0u8; 4096];
    u.local.read(0x1000, &mut copy).unwrap();
    assert_eq!(copy, pattern);
}

#[test]
fn test_largest_transfer() {
    let u = unit(2 * MAX_TRANSFER_SIZE);
    let block = u.storage.allocate(MAX_TRANSFER_SIZE, 128).unwrap();
    let pattern = random_bytes(MAX_TRANSFER_SIZE, 7);
    u.local.write(0, &pattern).unwrap();

    u.mfc.put(0, block, MAX_TRANSFER_SIZE, 0).unwrap();
    u.mfc.wait(0).unwrap();
    let mut copy = vec![0u8; MAX_TRANSFER_SIZE];
    u.storage.read(block, &mut copy).unwrap();
    assert_eq!(copy, pattern);

    assert_eq!(
        u.mfc.get(0, block, MAX_TRANSFER_SIZE + 16, 0),
        Err(DmaFault::InvalidSize {
            size: MAX_TRANSFER_SIZE + 16
        })
    );
}

#[test]
fn test_small_naturally_aligned_transfers() {
    let u = unit(4096);
    let block = u.storage.allocate(128, 128).unwrap();
    u.storage.write(block, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]).unwrap();

    u.mfc.get(0x204, block.offset(4), 4, 2).unwrap();
    u.mfc.get(0x208, block.offset(8), 8, 2).unwrap();
    u.mfc.get(0x201, block.offset(1), 1, 2).unwrap();
    u.mfc.wait(2).unwrap();

    let mut bytes = [0u8; 16];
    u.local.read(0x200, &mut bytes).unwrap();
    assert_eq!(bytes, [0, 2, 0, 0, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);

    // low nibbles differ
    assert!(matches!(
        u.mfc.get(0x200, block.offset(4), 4, 2),
        Err(DmaFault::Misaligned { .. })
    ));
}

#[test]
fn test_faults_stay_on_their_tag() {
    let u = unit(4096);
    let block = u.storage.allocate(128, 128).unwrap();
    let unmapped = block.offset(1024);

    u.mfc.get(0, unmapped, 128, 2).unwrap();
    u.mfc.get(0x400, block, 128, 5).unwrap();

    assert_eq!(u.mfc.wait(5), Ok(()));
    assert_eq!(
        u.mfc.wait(2),
        Err(DmaFault::InvalidEffectiveAddress {
            ea: unmapped.get(),
            size: 128
        })
    );
}

#[test]
fn test_first_fault_on_a_tag_wins() {
    let u = unit(4096);
    let base = u.storage.allocate(128, 128).unwrap();
    let first = base.offset(512);
    let second = base.offset(1024);

    u.mfc.get(0, first, 16, 4).unwrap();
    u.mfc.get(0, second, 16, 4).unwrap();
    assert_eq!(
        u.mfc.wait(4),
        Err(DmaFault::InvalidEffectiveAddress {
            ea: first.get(),
            size: 16
        })
    );
    assert_eq!(u.mfc.wait(4), Ok(()));
}

#[test]
fn test_released_block_is_unmapped() {
    let u = unit(4096);
    let block = u.storage.allocate(128, 128).unwrap();
    u.storage.release(block).unwrap();

    u.mfc.put(0, block, 128, 0).unwrap();
    assert!(matches!(
        u.mfc.wait(0),
        Err(DmaFault::InvalidEffectiveAddress { .. })
    ));
}

#[test]
fn test_local_store_overrun_faults() {
    let u = unit(4096);
    let block = u.storage.allocate(128, 128).unwrap();
    let lsa = LOCAL_STORE_SIZE as u32 - 16;

    u.mfc.put(lsa, block, 32, 9).unwrap();
    assert_eq!(u.mfc.wait(9), Err(DmaFault::LocalStoreRange { lsa, size: 32 }));
}

#[test]
fn test_addresses_below_main_storage_are_unmapped() {
    let u = unit(4096);
    u.mfc.get(0, EffectiveAddress::NULL, 16, 1).unwrap();
    assert!(matches!(
        u.mfc.wait(1),
        Err(DmaFault::InvalidEffectiveAddress { ea: 0, .. })
    ));
}

#[test]
fn test_drop_drains_issued_transfers() {
    let u = unit(4096);
    let block = u.storage.allocate(256, 128).unwrap();
    let pattern = random_bytes(256, 99);
    u.local.write(0x800, &pattern).unwrap();

    u.mfc.put(0x800, block, 256, 3).unwrap();
    let Unit { storage, mfc, .. } = u;
    drop(mfc);

    let mut copy = vec![0u8; 256];
    storage.read(block, &mut copy).unwrap();
    assert_eq!(copy, pattern);
}
