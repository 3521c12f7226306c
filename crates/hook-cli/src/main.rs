//! The `hook` launcher.
//!
//! Compiles and runs Hook source, or works with serialized bytecode:
//! `--analyze` stops after compilation, `--dump` prints the disassembly,
//! `--compile` persists the function tree, and `--run` executes a
//! previously compiled file. The first positional is the input path
//! (`-` or absent reads stdin); with `--compile` the second positional
//! is the output path. All positionals, input included, are exposed to
//! the script as the implicit `args` array.

use std::fs::File;
use std::io::Read;
use std::process;
use std::rc::Rc;
use std::time::Instant;

use clap::Parser;
use hook::{Closure, Function, Str, Value, Vm};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_OUTPUT: &str = "a.out";

#[derive(Parser)]
#[command(
    name = "hook",
    version,
    about = "The Hook programming language",
    disable_version_flag = true
)]
struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Treat the input as source text instead of a path
    #[arg(short = 'e', long = "eval")]
    eval: bool,

    /// Compile only; report errors without executing
    #[arg(short = 'a', long = "analyze")]
    analyze: bool,

    /// Print bytecode disassembly
    #[arg(short = 'd', long = "dump")]
    dump: bool,

    /// Write serialized bytecode to the output path
    #[arg(short = 'c', long = "compile")]
    compile: bool,

    /// Interpret the input as serialized bytecode
    #[arg(short = 'r', long = "run")]
    run: bool,

    /// VM stack size
    #[arg(short = 's', long = "stack-size", value_name = "N")]
    stack_size: Option<usize>,

    /// Input path (`-` or absent reads stdin), optional output path,
    /// and the arguments handed to the script
    #[arg(value_name = "ARGS")]
    args: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut vm = match cli.stack_size {
        Some(size) => Vm::with_stack_size(size),
        None => Vm::new(),
    };

    let closure = if cli.run {
        load_bytecode(&cli)
    } else {
        compile_input(&cli, &vm)
    };

    if cli.analyze {
        process::exit(0);
    }
    if cli.dump {
        let mut out = std::io::stdout();
        if let Err(err) = hook::dump(&closure.function, &mut out) {
            fatal(&format!("cannot write dump: {err}"));
        }
        process::exit(0);
    }
    if cli.compile {
        save_bytecode(&cli, &closure);
        process::exit(0);
    }

    let arguments: Vec<Value> = cli
        .args
        .iter()
        .map(|arg| Value::String(Rc::new(Str::from_chars(arg))))
        .collect();
    match vm.execute(closure, arguments) {
        Ok(result) => process::exit(result.as_int().unwrap_or(0) as i32),
        Err(err) => match err.exit_code() {
            Some(code) => process::exit(code),
            None => {
                eprintln!("{err}");
                process::exit(1);
            }
        },
    }
}

fn fatal(message: &str) -> ! {
    eprintln!("fatal error: {message}");
    process::exit(1);
}

fn input_path(cli: &Cli) -> Option<&str> {
    match cli.args.first().map(String::as_str) {
        None | Some("-") => None,
        Some(path) => Some(path),
    }
}

fn read_input(cli: &Cli) -> (String, Vec<u8>) {
    match input_path(cli) {
        Some(path) => {
            let mut bytes = Vec::new();
            match File::open(path).and_then(|mut file| file.read_to_end(&mut bytes)) {
                Ok(_) => (path.to_string(), bytes),
                Err(err) => fatal(&format!("cannot open file `{path}`: {err}")),
            }
        }
        None => {
            let mut bytes = Vec::new();
            if let Err(err) = std::io::stdin().read_to_end(&mut bytes) {
                fatal(&format!("cannot read stdin: {err}"));
            }
            ("<stdin>".to_string(), bytes)
        }
    }
}

fn compile_input(cli: &Cli, vm: &Vm) -> Rc<Closure> {
    let (file, source) = if cli.eval {
        match cli.args.first() {
            Some(source) => ("<eval>".to_string(), source.clone().into_bytes()),
            None => fatal("missing source text for --eval"),
        }
    } else {
        read_input(cli)
    };
    let source = String::from_utf8_lossy(&source).into_owned();
    let start = Instant::now();
    match vm.compile(&file, &source) {
        Ok(closure) => {
            debug!(file = %file, elapsed = ?start.elapsed(), "compiled");
            closure
        }
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}

fn load_bytecode(cli: &Cli) -> Rc<Closure> {
    let (file, bytes) = read_input(cli);
    match Function::deserialize(&mut bytes.as_slice()) {
        Ok(function) => {
            if function.num_nonlocals() != 0 {
                fatal("unable to load bytecode");
            }
            debug!(file = %file, "bytecode loaded");
            Rc::new(Closure::new(function, Vec::new()))
        }
        Err(err) => fatal(&err.to_string()),
    }
}

fn save_bytecode(cli: &Cli, closure: &Closure) {
    let output = cli
        .args
        .get(1)
        .map(String::as_str)
        .unwrap_or(DEFAULT_OUTPUT);
    let mut file = match File::create(output) {
        Ok(file) => file,
        Err(err) => fatal(&format!("cannot open file `{output}`: {err}")),
    };
    if let Err(err) = closure.function.serialize(&mut file) {
        fatal(&format!("cannot write file `{output}`: {err}"));
    }
    debug!(output = %output, "bytecode saved");
}
