use std::{cell::Cell, rc::Rc};

use rstest::rstest;
use tomasulo::{
    execution_unit::{FuId, UnitClass},
    hazard::HazardKind,
    inst::{BranchCond, Instruction, Reg},
    reservation_station::StationId,
    Assembler, BreakpointHandler, Cpu, CpuConfig, HaltReason, Program,
};

fn r(n: u8) -> Reg {
    Reg::gp(n)
}

fn countdown() -> Program {
    Assembler::new()
        .push(Instruction::add(r(1), Reg::ZERO, 3))
        .label("LOOP")
        .push(Instruction::branch(BranchCond::Le, r(1), 0, "END"))
        .push(Instruction::add(r(2), r(2), 2))
        .push(Instruction::sub(r(1), r(1), 1))
        .push(Instruction::jmp("LOOP"))
        .label("END")
        .push(Instruction::halt())
        .assemble()
        .unwrap()
}

fn alu_rs(i: u16) -> StationId {
    StationId::new(UnitClass::Alu, i)
}

#[test]
fn loop_scenario() {
    let mut cpu = Cpu::new(countdown(), CpuConfig::default()).unwrap();
    let res = cpu.run().unwrap();

    assert_eq!(res.halt, HaltReason::Halt);
    assert_eq!(cpu.registers().value(r(1)), Ok(Some(0)));
    assert_eq!(cpu.registers().value(r(2)), Ok(Some(6)));
    assert!(cpu.registers().pending_producers().is_empty());
    assert!(cpu.busy_stations().is_empty());

    // Three taken iterations of the body, each ending in a JMP.
    let jumps = cpu
        .retired()
        .iter()
        .filter(|i| matches!(i.inst, Instruction::Jump { .. }))
        .count();
    assert_eq!(jumps, 3);
    for inst in cpu.retired() {
        assert!(inst.trace.is_complete(), "{} has an incomplete trace", inst.inst);
    }

    // With a single ALU station everything retires in fetch order.
    let seqs = cpu.retired().iter().map(|i| i.seq).collect::<Vec<_>>();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);
}

#[test]
fn first_instruction_timing() {
    let mut cpu = Cpu::new(countdown(), CpuConfig::default()).unwrap();
    cpu.run().unwrap();

    let add = &cpu.retired()[0].trace;
    assert_eq!(add.issued, Some(1));
    assert_eq!(add.start_execution, Some(2));
    assert_eq!(add.write_result, Some(3));
    assert_eq!(add.written_result, Some(4));
    assert_eq!(add.station, Some(alu_rs(0)));
    assert_eq!(add.fu, Some(FuId::new(UnitClass::Alu, 0)));

    // The branch was fetched while the ADD held the only ALU station.
    let ble = &cpu.retired()[1];
    assert_eq!(ble.pc, 1);
    assert_eq!(ble.trace.hazards.len(), 1);
    let hazard = ble.trace.hazards[0];
    assert_eq!(
        hazard.kind,
        HazardKind::RsUnavailable {
            assigned: alu_rs(0)
        }
    );
    assert_eq!((hazard.detected_at, hazard.resolved_at), (2, 4));
    assert_eq!(ble.trace.issued, Some(4));
}

#[test]
fn back_to_back_loads_retire_in_order() {
    let prog = [
        Instruction::load(r(1), Reg::ZERO, 4),
        Instruction::load(r(2), Reg::ZERO, 4),
        Instruction::halt(),
    ]
    .into_iter()
    .collect::<Program>();
    let config = CpuConfig {
        mem_access_queue_size: 1,
        ..CpuConfig::default()
    };

    let mut cpu = Cpu::new(prog, config).unwrap();
    cpu.memory_mut().write(4, 9).unwrap();
    cpu.run().unwrap();

    let retired = cpu.retired();
    assert_eq!(retired.len(), 2);
    assert_eq!(retired[0].pc, 0);
    assert_eq!(retired[1].pc, 1);
    assert!(retired[0].trace.written_result <= retired[1].trace.issued);
    assert_eq!(cpu.registers().value(r(1)), Ok(Some(9)));
    assert_eq!(cpu.registers().value(r(2)), Ok(Some(9)));
    assert_eq!(cpu.peak_queue_depth(), 1);
}

#[test]
fn raw_hazard_resolves_at_broadcast() {
    let prog = [
        Instruction::add(r(1), Reg::ZERO, 5),
        Instruction::add(r(2), r(1), 1),
        Instruction::halt(),
    ]
    .into_iter()
    .collect::<Program>();
    let config = CpuConfig {
        alu_rs: 2,
        ..CpuConfig::default()
    };

    let mut cpu = Cpu::new(prog, config).unwrap();
    cpu.run().unwrap();

    let producer = &cpu.retired()[0];
    let consumer = &cpu.retired()[1];
    let raw = consumer
        .trace
        .hazards
        .iter()
        .find(|h| matches!(h.kind, HazardKind::Raw { .. }))
        .expect("consumer should have waited on R1");
    assert_eq!(
        raw.kind,
        HazardKind::Raw {
            register: r(1),
            producer: alu_rs(0)
        }
    );
    assert_eq!(Some(raw.resolved_at), producer.trace.written_result);
    assert!(consumer.trace.start_execution >= producer.trace.written_result);
    assert_eq!(cpu.registers().value(r(2)), Ok(Some(6)));
}

#[rstest]
#[case(1, true)]
#[case(2, false)]
fn cdb_contention(#[case] cdb_width: usize, #[case] contended: bool) {
    // ADD takes two cycles and SUB one, so both finish in the same cycle.
    let prog = [
        Instruction::add(r(1), Reg::ZERO, 1),
        Instruction::sub(r(2), Reg::ZERO, 1),
        Instruction::halt(),
    ]
    .into_iter()
    .collect::<Program>();
    let mut config = CpuConfig::from_directives([("alu_rs", 2), ("alu_fu", 2), ("add_latency", 2)])
        .unwrap();
    config.cdb_width = cdb_width;

    let mut cpu = Cpu::new(prog, config).unwrap();
    cpu.run().unwrap();

    let sub = cpu
        .retired()
        .iter()
        .find(|i| i.pc == 1)
        .expect("SUB retired");
    let cdb_hazards = sub
        .trace
        .hazards_of(|k| *k == HazardKind::CdbUnavailable)
        .collect::<Vec<_>>();
    assert_eq!(!cdb_hazards.is_empty(), contended);
    if contended {
        assert_eq!((cdb_hazards[0].detected_at, cdb_hazards[0].resolved_at), (4, 5));
    }
    assert!(cpu.peak_cdb_writers() <= cdb_width);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn fu_pool_bounds(#[case] fus: usize) {
    let prog = (1..6)
        .map(|n| Instruction::add(r(n), Reg::ZERO, n as i64))
        .chain([Instruction::halt()])
        .collect::<Program>();
    let config = CpuConfig {
        alu_rs: 4,
        alu_fu: fus,
        alu_latency: 3,
        ..CpuConfig::default()
    };

    let mut cpu = Cpu::new(prog, config).unwrap();
    cpu.run().unwrap();

    assert!(cpu.peak_fus_in_use(UnitClass::Alu) <= fus);
    assert!(cpu.peak_stations_in_use(UnitClass::Alu) <= 4);
    let fu_hazards = cpu
        .retired()
        .iter()
        .flat_map(|i| i.trace.hazards_of(|k| matches!(k, HazardKind::FuUnavailable { .. })))
        .count();
    if fus == 1 {
        assert!(fu_hazards > 0);
    }
}

#[test]
fn breakpoint_handlers() {
    let per_inst = Rc::new(Cell::new(0));
    let cpu_wide = Rc::new(Cell::new(0));
    let seen_r1 = Rc::new(Cell::new(None));

    let prog = Assembler::new()
        .push(Instruction::add(r(1), Reg::ZERO, 2))
        .label("LOOP")
        .push(Instruction::branch(BranchCond::Eq, r(1), 0, "END"))
        .push(Instruction::sub(r(1), r(1), 1))
        .push(Instruction::breakpoint_with(BreakpointHandler::new({
            let per_inst = per_inst.clone();
            move |_| per_inst.set(per_inst.get() + 1)
        })))
        .push(Instruction::jmp("LOOP"))
        .label("END")
        .push(Instruction::breakpoint())
        .push(Instruction::halt())
        .assemble()
        .unwrap();

    let handler = BreakpointHandler::new({
        let (cpu_wide, seen_r1) = (cpu_wide.clone(), seen_r1.clone());
        move |cpu| {
            cpu_wide.set(cpu_wide.get() + 1);
            seen_r1.set(Some(cpu.registers().get(Reg::gp(1)).is_ok()));
        }
    });
    let mut cpu = Cpu::new(prog, CpuConfig::default())
        .unwrap()
        .with_breakpoint_handler(handler);
    cpu.run().unwrap();

    assert_eq!(per_inst.get(), 2);
    assert_eq!(cpu_wide.get(), 3);
    assert_eq!(seen_r1.get(), Some(true));
    assert!(cpu
        .retired()
        .iter()
        .all(|i| !matches!(i.inst, Instruction::Breakpoint { .. })));
}

#[test]
fn fetch_out_of_range_stops_cleanly() {
    let prog = [Instruction::add(r(1), Reg::ZERO, 1)]
        .into_iter()
        .collect::<Program>();
    let mut cpu = Cpu::new(prog, CpuConfig::default()).unwrap();
    let res = cpu.run().unwrap();
    assert_eq!(res.halt, HaltReason::FetchOutOfRange);
    assert_eq!(cpu.halt_reason(), Some(HaltReason::FetchOutOfRange));
    assert_eq!(cpu.retired().len(), 1);
}

#[test]
fn step_matches_run() {
    let mut stepped = Cpu::new(countdown(), CpuConfig::default()).unwrap();
    let mut steps = 0;
    while stepped.step().unwrap() {
        steps += 1;
        assert!(stepped.to_string().starts_with("CLK "));
    }
    assert!(steps > 0);

    let mut ran = Cpu::new(countdown(), CpuConfig::default()).unwrap();
    let res = ran.run().unwrap();
    assert_eq!(stepped.now(), res.cycles_taken);
    assert_eq!(stepped.registers(), ran.registers());
    assert_eq!(stepped.retired().len(), ran.retired().len());
    assert!(!stepped.step().unwrap());
}

#[test]
fn trace_serialises() {
    let mut cpu = Cpu::new(countdown(), CpuConfig::default()).unwrap();
    cpu.run().unwrap();

    let add = serde_json::to_value(&cpu.retired()[0]).unwrap();
    assert_eq!(add["seq"], 0);
    assert_eq!(add["inst"], "ADD R1, R0, 3");
    assert_eq!(add["trace"]["issued"], 1);
    assert_eq!(add["trace"]["station"], "AluRS1");
    assert_eq!(add["trace"]["fu"], "ALU1");

    let ble = serde_json::to_value(&cpu.retired()[1]).unwrap();
    assert_eq!(
        ble["trace"]["hazards"][0],
        serde_json::json!({
            "kind": "RsUnavailable",
            "assigned": "AluRS1",
            "detected_at": 2,
            "resolved_at": 4,
        })
    );
}

#[test]
fn unresolved_label_is_an_assembly_error() {
    // Rejected before anything is fetched, even though the ADD alone would have run.
    let prog = [
        Instruction::add(r(1), Reg::ZERO, 1),
        Instruction::jmp("NOWHERE"),
        Instruction::halt(),
    ]
    .into_iter()
    .collect::<Program>();
    assert_eq!(
        Cpu::new(prog, CpuConfig::default()).unwrap_err(),
        tomasulo::SimError::Assembly {
            label: "NOWHERE".to_owned()
        }
    );
}
