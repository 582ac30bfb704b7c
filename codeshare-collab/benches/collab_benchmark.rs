use std::hint::black_box;
use std::sync::Arc;

use codeshare_collab::broadcast::BroadcastGroup;
use codeshare_collab::doc::SharedDoc;
use codeshare_collab::presence::{AwarenessMessage, PresenceRecord, PresenceRoom};
use codeshare_collab::protocol::{PeerInfo, SyncMessage};
use codeshare_collab::storage::{LocalStore, StoreConfig};
use codeshare_core::Item;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use uuid::Uuid;

/// 20 folders with 10 files each.
fn project_items() -> Vec<Item> {
    let mut items = Vec::new();
    for d in 0..20 {
        let folder = Item::folder(None, format!("dir_{d}"));
        for f in 0..10 {
            items.push(Item::file(
                Some(folder.id()),
                format!("file_{f}.move"),
                "module 0x1::m { fun f() {} }\n".repeat(8),
            ));
        }
        items.push(folder);
    }
    items
}

fn seeded_doc(items: &[Item]) -> SharedDoc {
    let doc = SharedDoc::new();
    doc.seed(items, None).unwrap();
    doc
}

fn bench_delta_encode(c: &mut Criterion) {
    let peer = Uuid::new_v4();
    let delta = vec![0u8; 64];

    c.bench_function("delta_encode_64B", |b| {
        b.iter(|| {
            let msg = SyncMessage::delta(black_box(peer), black_box("room"), 1, delta.clone());
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_delta_decode(c: &mut Criterion) {
    let msg = SyncMessage::delta(Uuid::new_v4(), "room", 1, vec![0u8; 64]);
    let encoded = msg.encode().unwrap();

    c.bench_function("delta_decode_64B", |b| {
        b.iter(|| {
            black_box(SyncMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_doc_seed(c: &mut Criterion) {
    let items = project_items();
    let mut group = c.benchmark_group("SharedDoc");
    group.throughput(Throughput::Elements(items.len() as u64));

    group.bench_function("seed_220_items", |b| {
        b.iter(|| black_box(seeded_doc(black_box(&items))))
    });

    let state = seeded_doc(&items).full_state();
    group.bench_function("apply_full_state_220_items", |b| {
        b.iter(|| {
            let doc = SharedDoc::new();
            black_box(doc.apply_remote(black_box(&state)).unwrap());
        })
    });

    let doc = seeded_doc(&items);
    group.bench_function("items_220", |b| b.iter(|| black_box(doc.items())));
    group.finish();
}

fn bench_text_edit(c: &mut Criterion) {
    let items = project_items();
    let doc = seeded_doc(&items);
    let file = items.iter().find(|i| !i.is_folder()).unwrap().id();

    c.bench_function("edit_content_insert", |b| {
        b.iter(|| {
            doc.edit_content(&file, 0, 0, black_box("x")).unwrap();
        })
    });
}

fn bench_broadcast_raw(c: &mut Criterion) {
    let group = BroadcastGroup::new(1024);
    let _receivers: Vec<_> = (0..100)
        .map(|i| group.add_peer(PeerInfo::new(format!("u-{i}"), format!("Peer{i}"))))
        .collect();
    let data = Arc::new(vec![0u8; 64]);

    c.bench_function("broadcast_raw_100_peers", |b| {
        b.iter(|| black_box(group.broadcast_raw(Arc::clone(&data))))
    });
}

fn bench_presence_collaborators(c: &mut Criterion) {
    let mut room = PresenceRoom::new(Uuid::new_v4(), PresenceRecord::new("me", "Me", true));
    // 200 connections shared by 50 users.
    for i in 0..200 {
        let record = PresenceRecord::new(format!("u-{}", i % 50), format!("User {}", i % 50), false);
        room.handle_message(Uuid::new_v4(), &AwarenessMessage::Update(record));
    }

    c.bench_function("collaborators_200_connections", |b| {
        b.iter(|| black_box(room.collaborators()))
    });
}

fn bench_snapshot_roundtrip(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let state = seeded_doc(&project_items()).full_state();

    c.bench_function("save_snapshot_220_items", |b| {
        b.iter(|| black_box(store.save_snapshot("bench", black_box(&state)).unwrap()))
    });
    c.bench_function("load_snapshot_220_items", |b| {
        b.iter(|| black_box(store.load_snapshot("bench").unwrap()))
    });
}

criterion_group!(
    benches,
    bench_delta_encode,
    bench_delta_decode,
    bench_doc_seed,
    bench_text_edit,
    bench_broadcast_raw,
    bench_presence_collaborators,
    bench_snapshot_roundtrip,
);
criterion_main!(benches);
