use luacoop::lua_vm::SafeOption;
use luacoop::{LuaTable, LuaValue, MultiValue, RunState, Stdlib, undump};
use std::cell::Cell;
use std::env;
use std::fs;
use std::rc::Rc;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const VERSION: &str = "luacoop 0.1 (Lua 5.1 bytecode)";

fn print_usage() {
    eprintln!("usage: luacoop [options] chunk [args]");
    eprintln!("Available options are:");
    eprintln!("  -f n      run at most n new frames per thread per tick");
    eprintln!("  -t n      stop after n scheduler ticks");
    eprintln!("  -n        disable the instruction fuse");
    eprintln!("  -v        show version information");
    eprintln!("  --        stop handling options");
}

#[derive(Default)]
struct Options {
    chunk_file: Option<String>,
    chunk_args: Vec<String>,
    frames_per_tick: Option<usize>,
    max_ticks: Option<u64>,
    no_fuse: bool,
    show_version: bool,
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("'{}' needs argument", flag))?;
    value
        .parse()
        .map_err(|_| format!("'{}' expects a number, got '{}'", flag, value))
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut i = 1;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];

        if !stop_options && arg.starts_with('-') {
            match arg.as_str() {
                "-f" => {
                    i += 1;
                    opts.frames_per_tick = Some(parse_number("-f", args.get(i))?);
                }
                "-t" => {
                    i += 1;
                    opts.max_ticks = Some(parse_number("-t", args.get(i))?);
                }
                "-n" => opts.no_fuse = true,
                "-v" => opts.show_version = true,
                "--" => stop_options = true,
                _ => return Err(format!("unrecognized option '{}'", arg)),
            }
        } else {
            opts.chunk_file = Some(arg.clone());
            opts.chunk_args = args[i + 1..].to_vec();
            break;
        }
        i += 1;
    }

    Ok(opts)
}

/// `arg[0]` is the chunk name, `arg[1..]` its arguments.
fn setup_arg_table(rs: &RunState, chunk_name: &str, args: &[String]) {
    let mut table = LuaTable::new(args.len(), 1);
    table.set_int(0, LuaValue::from(chunk_name));
    for (i, a) in args.iter().enumerate() {
        table.set_int(i as i64 + 1, LuaValue::from(a.as_str()));
    }
    rs.vm().set_global("arg", LuaValue::table(table));
}

fn run(opts: &Options) -> Result<(), String> {
    let Some(filename) = &opts.chunk_file else {
        return Err("no chunk given".to_string());
    };
    let data = fs::read(filename).map_err(|e| format!("cannot open {}: {}", filename, e))?;
    let proto = undump(&data).map_err(|e| format!("{}: {}", filename, e))?;

    let mut options = SafeOption::default();
    if let Some(frames) = opts.frames_per_tick {
        options.max_frames_per_tick = frames.max(1);
    }
    if opts.no_fuse {
        options.instruction_fuse = None;
    }

    let rs = RunState::new(options);
    rs.vm()
        .open_stdlib(Stdlib::All)
        .map_err(|e| e.full_message())?;
    rs.register_spawn("spawn");
    setup_arg_table(&rs, filename, &opts.chunk_args);

    let failed = Rc::new(Cell::new(false));
    let flag = failed.clone();
    rs.default_group().set_exception_handler(move |id, e| {
        eprintln!("luacoop: thread {}: {}", id, e.full_message());
        flag.set(true);
    });

    let main = LuaValue::from(rs.vm().load(proto));
    let args = opts
        .chunk_args
        .iter()
        .map(|a| LuaValue::from(a.as_str()))
        .collect();
    rs.spawn(main, MultiValue::multiple(args));

    let mut ticks = 0u64;
    while !rs.is_idle() {
        if opts.max_ticks.is_some_and(|max| ticks >= max) {
            rs.destroy();
            return Err(format!("stopped after {} ticks", ticks));
        }
        rs.update();
        ticks += 1;
    }

    if failed.get() {
        return Err("one or more threads failed".to_string());
    }
    Ok(())
}

fn main() {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("luacoop: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    if opts.show_version {
        println!("{}", VERSION);
        if opts.chunk_file.is_none() {
            return;
        }
    }

    if opts.chunk_file.is_none() {
        print_usage();
        std::process::exit(1);
    }

    if let Err(e) = run(&opts) {
        eprintln!("luacoop: {}", e);
        std::process::exit(1);
    }
}
