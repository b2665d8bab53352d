/// Recwrap - recursive call-site instrumentation demo CLI
use recwrap::backend::recursive::transformation_name;
use recwrap::{
    CallArgs, CallShape, ChunkBuilder, Function, Instruction, NativeFn, RecursiveWrap, Scope,
    Value, Vm, VmConfig,
};
use std::env;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_DEPTH: usize = 3;

fn print_usage() {
    eprintln!("Recwrap v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    recwrap [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help           Print this help message");
    eprintln!("    -v, --version        Print version information");
    eprintln!("    --trace              Log every executed instruction");
    eprintln!("    --disassemble        Print the decorated entry function");
    eprintln!("    --config <FILE>      Load VM settings from a TOML file");
    eprintln!("    --depth <N>          Length of the demo call chain (default: {})", DEFAULT_DEPTH);
    eprintln!();
    eprintln!("Builds a chain of functions, each calling the next, decorates the");
    eprintln!("first one with a counting transformation and runs it.");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    recwrap --depth 5");
    eprintln!("    RUST_LOG=recwrap=debug recwrap --disassemble");
}

fn print_version() {
    println!("Recwrap {}", VERSION);
}

struct Options {
    trace: bool,
    disassemble: bool,
    config: Option<String>,
    depth: usize,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut trace = false;
    let mut disassemble = false;
    let mut config = None;
    let mut depth = DEFAULT_DEPTH;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                process::exit(0);
            }
            "--trace" => {
                trace = true;
            }
            "--disassemble" => {
                disassemble = true;
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing file after --config".to_string());
                }
                config = Some(args[i].clone());
            }
            "--depth" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value after --depth".to_string());
                }
                depth = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid depth: {}", args[i]))?;
                if depth == 0 || depth > i8::MAX as usize {
                    return Err(format!("Depth must be between 1 and {}", i8::MAX));
                }
            }
            arg => {
                return Err(format!("Unknown option: {}", arg));
            }
        }
        i += 1;
    }

    Ok(Options {
        trace,
        disassemble,
        config,
        depth,
    })
}

fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("recwrap=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recwrap=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Name of the `index`th function in the chain
fn link_name(index: usize) -> String {
    format!("link_{}", index)
}

/// Bind `link_0 -> link_1 -> ... -> link_{depth-1}` into `scope`
///
/// The last link returns the chain length.
fn build_chain(scope: &Arc<Scope>, depth: usize) -> Value {
    let mut first = Value::Nil;
    for index in 0..depth {
        let name = link_name(index);
        let mut builder = ChunkBuilder::new(name.as_str());
        if index + 1 < depth {
            builder.emit_load_global(&link_name(index + 1));
            builder.emit_call(CallShape::positional(0));
        } else {
            builder.emit(Instruction::PushLongSmall(depth as i8));
        }
        builder.emit(Instruction::Return);

        let function = Function::new(name.as_str(), builder.build_arc(), Arc::clone(scope)).into_value();
        scope.bind(name, function.clone());
        if index == 0 {
            first = function;
        }
    }
    first
}

/// Identity transformation that counts and reports each application
fn counting_transformation(calls: Arc<AtomicUsize>) -> Value {
    NativeFn::new("count_calls", move |_vm, args: CallArgs| {
        let target = args.positional.into_iter().next().unwrap_or(Value::Nil);
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        println!("  [{}] wrapping {}", n, transformation_name(&target));
        Ok(target)
    })
    .into_value()
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    init_logging(options.trace);

    let mut config = match &options.config {
        Some(path) => match VmConfig::from_toml_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path, e);
                process::exit(1);
            }
        },
        None => VmConfig::default(),
    };
    config.trace |= options.trace;

    let scope = Scope::new("demo");
    let entry = build_chain(&scope, options.depth);
    let calls = Arc::new(AtomicUsize::new(0));
    let transformation = counting_transformation(Arc::clone(&calls));

    let wrap = RecursiveWrap::new();
    let mut vm = Vm::with_config(config);

    println!("Decorating {}:", link_name(0));
    let decorator = wrap.apply_recursive(transformation, Vec::new(), Default::default());
    let decorated = match vm.call_value(&decorator, CallArgs::one(entry)) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if options.disassemble {
        if let Some(function) = decorated.as_function() {
            println!();
            print!("{}", function.disassemble());
            println!();
        }
    }

    println!("Running {}:", link_name(0));
    match vm.call_value(&decorated, CallArgs::default()) {
        Ok(result) => {
            println!();
            println!("result:       {}", result);
            println!("applications: {}", calls.load(Ordering::SeqCst));
            println!("history:      {}", wrap.wrap_history(&decorated));
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
