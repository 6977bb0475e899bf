use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tomasulo::{
    emulated::Emulated,
    exec,
    inst::{BranchCond, Instruction, Reg},
    Assembler, Cpu, CpuConfig, Machine, Program,
};

fn countdown(n: i64) -> Program {
    let r = Reg::gp;
    Assembler::new()
        .push(Instruction::add(r(1), Reg::ZERO, n))
        .label("LOOP")
        .push(Instruction::branch(BranchCond::Le, r(1), 0, "END"))
        .push(Instruction::add(r(2), r(2), 2))
        .push(Instruction::store(r(2), Reg::ZERO, 4))
        .push(Instruction::load(r(3), Reg::ZERO, 4))
        .push(Instruction::sub(r(1), r(1), 1))
        .push(Instruction::jmp("LOOP"))
        .label("END")
        .push(Instruction::halt())
        .assemble()
        .unwrap()
}

fn wide() -> CpuConfig {
    CpuConfig {
        cdb_width: 2,
        alu_rs: 4,
        alu_fu: 2,
        mem_rs: 3,
        mem_fu: 2,
        mem_access_queue_size: 3,
        ..CpuConfig::default()
    }
}

fn run<M: Machine>(prog: Program, config: CpuConfig) -> usize {
    exec::<M>(prog, config).unwrap().insts_retired
}

fn countdown_large(c: &mut Criterion) {
    let mut group = c.benchmark_group("countdown_large");
    group.sample_size(10);
    group.bench_function("tomasulo minimal 200", |b| {
        b.iter(|| run::<Cpu>(countdown(black_box(200)), CpuConfig::default()))
    });
    group.bench_function("tomasulo wide 200", |b| {
        b.iter(|| run::<Cpu>(countdown(black_box(200)), wide()))
    });
    group.bench_function("emulated 200", |b| {
        b.iter(|| run::<Emulated>(countdown(black_box(200)), CpuConfig::default()))
    });
    group.finish();
}

criterion_group!(benches, countdown_large);
criterion_main!(benches);
