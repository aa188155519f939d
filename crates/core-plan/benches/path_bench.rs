use criterion::{Criterion, criterion_group, criterion_main};

use core_geom::Coord;
use core_grid::Matrix;
use core_plan::{compress, shortest_path};
use core_state::State;

fn bench_shortest_path(c: &mut Criterion) {
    // Corner-to-corner route across a grid with a partial wall in the way.
    let mut m = Matrix::empty(50);
    for y in 0..50 {
        for z in 0..49 {
            m.set_full(Coord::new(25, y, z)).unwrap();
        }
    }
    let state = State::new(m).unwrap();
    let goal = Coord::new(49, 49, 49);

    c.bench_function("bfs_50_walled", |b| {
        b.iter(|| shortest_path(&state, 1, std::hint::black_box(goal)))
    });

    let path = shortest_path(&state, 1, goal).expect("route exists");
    c.bench_function("compress_walled_route", |b| {
        b.iter(|| compress(std::hint::black_box(&path)))
    });
}

criterion_group!(benches, bench_shortest_path);
criterion_main!(benches);
