use criterion::*;
use qshard::prelude::*;

fn dense_sweep(q_num: usize) {
    let mut engine = LocalEngine::<f64>::local(q_num, 0);
    for q in 0..q_num {
        engine.apply(&op::h(q)).unwrap();
    }
    for q in 1..q_num {
        engine.apply(&op::cnot(q, q - 1)).unwrap();
    }
    assert!((engine.norm_sqr() - 1.0).abs() < 1e-9);
}

fn fused_sweep(q_num: usize) {
    let mut engine = LocalEngine::<f64>::local(q_num, 0);
    let fused: Vec<usize> = (0..6).collect();
    engine.begin_fusion(&fused).unwrap();
    for q in 0..6 {
        engine.apply(&op::h(q)).unwrap();
    }
    for q in 1..6 {
        engine.apply(&op::cnot(q, q - 1)).unwrap();
    }
    engine.end_fusion().unwrap();
    assert!((engine.norm_sqr() - 1.0).abs() < 1e-9);
}

fn sampling(q_num: usize) {
    let mut engine = LocalEngine::<f64>::local(q_num, 0);
    for q in 0..q_num {
        engine.apply(&op::h(q)).unwrap();
    }
    let events = engine.generate_events(1024, 7).unwrap();
    assert_eq!(events.len(), 1024);
}

fn performance(c: &mut Criterion) {
    for q_num in [14, 16, 18] {
        c.bench_function(format!("dense_sweep_qu{}", q_num).as_str(), |b| {
            b.iter(|| dense_sweep(black_box(q_num)))
        });
    }
    for q_num in [14, 16] {
        c.bench_function(format!("fused_sweep_qu{}", q_num).as_str(), |b| {
            b.iter(|| fused_sweep(black_box(q_num)))
        });
        c.bench_function(format!("sampling_qu{}", q_num).as_str(), |b| {
            b.iter(|| sampling(black_box(q_num)))
        });
    }
}

criterion_group!(benches, performance);
criterion_main!(benches);
