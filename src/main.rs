use std::time::Instant;

use tomasulo::{
    inst::{BranchCond, Instruction, Reg},
    Assembler, BreakpointHandler, Cpu, CpuConfig,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let start = Instant::now();

    let config = match std::env::args().skip(1).find(|a| !a.starts_with("--")) {
        Some(path) => {
            let contents = std::fs::read_to_string(&path).expect("failed to open config file");
            CpuConfig::from_toml_str(&contents).expect("failed to parse config")
        }
        None => CpuConfig::default(),
    };
    let step_by_step = std::env::args().any(|a| a == "--step");

    let r = Reg::gp;
    let prog = Assembler::new()
        .push(Instruction::add(r(1), Reg::ZERO, 3))
        .label("LOOP")
        .push(Instruction::branch(BranchCond::Le, r(1), 0, "END"))
        .push(Instruction::add(r(2), r(2), 2))
        .push(Instruction::sub(r(1), r(1), 1))
        .push(Instruction::breakpoint_with(BreakpointHandler::new(|cpu| {
            println!("{cpu}")
        })))
        .push(Instruction::jmp("LOOP"))
        .label("END")
        .push(Instruction::halt())
        .assemble()
        .expect("failed to assemble program");

    let mut cpu = Cpu::new(prog, config).expect("invalid configuration");

    if step_by_step {
        loop {
            match cpu.step() {
                Ok(true) => println!("{cpu}"),
                Ok(false) => break,
                Err(e) => {
                    eprintln!("simulation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    let res = match cpu.run() {
        Ok(res) => res,
        Err(e) => {
            eprintln!("simulation failed: {e}");
            std::process::exit(1);
        }
    };
    println!("{cpu}");

    for inst in cpu.retired() {
        let t = &inst.trace;
        println!(
            "{:>4} {:<20} issued {:>3?}  exec {:>3?}  write {:>3?}  done {:>3?}  {}",
            inst.seq,
            inst.inst.to_string(),
            t.issued,
            t.start_execution,
            t.write_result,
            t.written_result,
            t.hazards
                .iter()
                .map(|h| format!("[{} @{}..{}]", h.kind, h.detected_at, h.resolved_at))
                .collect::<Vec<_>>()
                .join(" ")
        );
    }

    println!("    EXECUTION COMPLETED");
    println!("    =====================");
    println!("    Instructions retired: {}", res.insts_retired);
    println!("            Cycles taken: {}", res.cycles_taken);
    println!(
        "  Instructions per clock: {:.2}",
        res.insts_retired as f32 / res.cycles_taken as f32
    );
    println!(
        "  Simulator time elapsed: {:.2}s",
        start.elapsed().as_secs_f32()
    );
}
