use luacoop::lua_vm::OpMode;
use luacoop::{Instruction, OpCode, Prototype, undump};
use std::env;
use std::fs;

fn main() {
    let args: Vec<String> = env::args().collect();

    let data = if args.len() > 1 {
        let filename = &args[1];
        match fs::read(filename) {
            Ok(content) => {
                println!("=== File: {} ===\n", filename);
                content
            }
            Err(e) => {
                eprintln!("Error reading file '{}': {}", filename, e);
                std::process::exit(1);
            }
        }
    } else {
        println!("Usage: bytecode_dump <chunk.luac>");
        std::process::exit(0);
    };

    match undump(&data) {
        Ok(proto) => dump_proto(&proto, "main", 0),
        Err(e) => {
            eprintln!("Load error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Register or constant operand, luac style: constants print as `K(n)`.
fn rk(proto: &Prototype, value: u32) -> String {
    if Instruction::is_k(value) {
        let index = Instruction::index_k(value);
        match proto.constants.get(index) {
            Some(k) => format!("K({})={:?}", index, k),
            None => format!("K({})=<missing>", index),
        }
    } else {
        value.to_string()
    }
}

fn constant(proto: &Prototype, index: u32) -> String {
    match proto.constants.get(index as usize) {
        Some(k) => format!("{:?}", k),
        None => "<missing>".to_string(),
    }
}

fn describe(proto: &Prototype, instr: Instruction, op: OpCode) -> String {
    let a = instr.get_a();
    let b = instr.get_b();
    let c = instr.get_c();
    let bx = instr.get_bx();

    match op {
        OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal => {
            format!("{} {}\t; {}", a, bx, constant(proto, bx))
        }
        OpCode::Closure => format!("{} {}\t; proto[{}]", a, bx, bx),
        OpCode::GetTable | OpCode::Self_ => format!("{} {} {}", a, b, rk(proto, c)),
        OpCode::SetTable
        | OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Pow
        | OpCode::Eq
        | OpCode::Lt
        | OpCode::Le => format!("{} {} {}", a, rk(proto, b), rk(proto, c)),
        OpCode::GetUpval | OpCode::SetUpval => {
            let name = proto
                .upvalue_names
                .get(b as usize)
                .map(|n| n.as_str())
                .unwrap_or("-");
            format!("{} {}\t; {}", a, b, name)
        }
        _ => match op.get_mode() {
            OpMode::IABC => format!("{} {} {}", a, b, c),
            OpMode::IABx => format!("{} {}", a, bx),
            OpMode::IAsBx => format!("{} {}", a, instr.get_sbx()),
        },
    }
}

fn dump_proto(proto: &Prototype, name: &str, depth: usize) {
    let indent = "  ".repeat(depth);

    println!(
        "{}=== {} <{}:{},{}> ===",
        indent, name, proto.source, proto.line_defined, proto.last_line_defined
    );
    println!(
        "{}params: {}, vararg: {}, upvalues: {}, max_stack: {}",
        indent,
        proto.num_params,
        proto.is_vararg(),
        proto.num_upvalues,
        proto.max_stack_size
    );
    println!();

    for (pc, &instr) in proto.code.iter().enumerate() {
        let line = proto
            .line_at(pc)
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        match instr.get_opcode() {
            Some(op) => println!(
                "{}  [{:3}] [{:>4}] {:<10} {}",
                indent,
                pc + 1,
                line,
                op.name(),
                describe(proto, instr, op)
            ),
            None => println!(
                "{}  [{:3}] [{:>4}] ???        0x{:08x}",
                indent,
                pc + 1,
                line,
                instr.as_u32()
            ),
        }
    }

    if !proto.constants.is_empty() {
        println!("\n{}constants ({}):", indent, proto.constants.len());
        for (i, k) in proto.constants.iter().enumerate() {
            println!("{}  [{}] {:?}", indent, i, k);
        }
    }

    if !proto.locals.is_empty() {
        println!("\n{}locals ({}):", indent, proto.locals.len());
        for (i, local) in proto.locals.iter().enumerate() {
            println!(
                "{}  [{}] {} {}..{}",
                indent,
                i,
                local.name,
                local.start_pc + 1,
                local.end_pc + 1
            );
        }
    }

    for (i, child) in proto.protos.iter().enumerate() {
        println!();
        dump_proto(child, &format!("{}.proto[{}]", name, i), depth + 1);
    }
}
