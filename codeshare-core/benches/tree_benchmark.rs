use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use codeshare_core::{lock, Item, ItemTree, TabState};

/// `width` folders at each of `depth` levels, one file per folder.
fn nested_items(depth: usize, width: usize) -> Vec<Item> {
    let mut items = Vec::new();
    let mut parents = vec![None];
    for level in 0..depth {
        let mut next = Vec::new();
        for parent in &parents {
            for w in 0..width {
                let folder = Item::folder(*parent, format!("dir_{level}_{w}"));
                items.push(Item::file(Some(folder.id()), format!("f_{level}_{w}.move"), "x"));
                next.push(Some(folder.id()));
                items.push(folder);
            }
        }
        parents = next;
    }
    items
}

fn bench_path_resolution(c: &mut Criterion) {
    let items = nested_items(6, 3);
    let mut group = c.benchmark_group("ItemTree");
    group.throughput(Throughput::Elements(items.len() as u64));

    group.bench_function("path_of_all_items", |b| {
        b.iter(|| {
            let mut tree = ItemTree::new(black_box(&items));
            for item in &items {
                black_box(tree.path_of(&item.id()));
            }
        })
    });

    group.finish();
}

fn bench_tab_eviction(c: &mut Criterion) {
    let items = nested_items(5, 3);
    let root = items
        .iter()
        .find(|i| i.is_folder() && i.parent_id().is_none())
        .map(|i| i.id())
        .unwrap();
    let mut tabs = TabState::new();
    for item in items.iter().filter(|i| !i.is_folder()) {
        tabs.open(item.id());
    }

    c.bench_function("evict_tabs_under_root_folder", |b| {
        let tree = ItemTree::new(&items);
        b.iter(|| {
            let mut tabs = tabs.clone();
            black_box(lock::evict_tabs(&tree, &root, &mut tabs, codeshare_core::SessionRole::Guest));
        })
    });
}

criterion_group!(benches, bench_path_resolution, bench_tab_eviction);
criterion_main!(benches);
