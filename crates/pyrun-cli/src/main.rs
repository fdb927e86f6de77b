use std::{env, fs, process::ExitCode, thread, time::Instant};

use pyrun::{
    Builtins, CompiledUnit, LimitedTracker, NoopTracer, ProfilingTracer, ResourceLimits, StdPrint, StderrTracer, VM,
    VmTracer,
};

/// Python recursion happens on the Rust stack, so run on a thread with room for it.
const STACK_SIZE: usize = 256 * 1024 * 1024;

const USAGE: &str = "usage: pyrun <unit.json|unit.bin> [--trace[=N]] [--profile] [--max-ops N] [--max-depth N] [--max-memory BYTES]";

#[derive(Debug, Default)]
struct Options {
    path: String,
    trace: Option<Option<usize>>,
    profile: bool,
    limits: ResourceLimits,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    let unit = match load_unit(&options.path) {
        Ok(unit) => unit,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let worker = thread::Builder::new()
        .stack_size(STACK_SIZE)
        .spawn(move || run(&unit, &options));
    match worker.map(thread::JoinHandle::join) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            eprintln!("error: interpreter thread panicked");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: failed to start interpreter thread: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(unit: &CompiledUnit, options: &Options) -> ExitCode {
    match (options.trace, options.profile) {
        (_, true) => {
            let (code, tracer) = execute(unit, options, ProfilingTracer::new());
            eprintln!("{}", tracer.report());
            code
        }
        (Some(Some(limit)), false) => execute(unit, options, StderrTracer::with_limit(limit)).0,
        (Some(None), false) => execute(unit, options, StderrTracer::new()).0,
        (None, false) => execute(unit, options, NoopTracer).0,
    }
}

fn execute<Tr: VmTracer>(unit: &CompiledUnit, options: &Options, tracer: Tr) -> (ExitCode, Tr) {
    let mut print = StdPrint;
    let tracker = LimitedTracker::new(options.limits.clone());
    let mut vm = VM::new(Builtins::default(), tracker, &mut print, tracer);

    let start = Instant::now();
    let result = vm.run_code(unit);
    let elapsed = start.elapsed();
    let code = match result {
        Ok(value) => {
            eprintln!("success after: {elapsed:?}\n{}", value.py_repr());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after: {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    };
    (code, vm.into_tracer())
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        limits: ResourceLimits::new(),
        ..Options::default()
    };
    let mut path = None;
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--trace" => options.trace = Some(None),
            "--profile" => options.profile = true,
            "--max-ops" => {
                let value = parse_number(&arg, args.next())?;
                options.limits = options.limits.max_operations(value);
            }
            "--max-depth" => {
                let value = parse_number(&arg, args.next())?;
                options.limits = options.limits.max_recursion_depth(Some(value));
            }
            "--max-memory" => {
                let value = parse_number(&arg, args.next())?;
                options.limits = options.limits.max_memory(value);
            }
            other if other.starts_with("--trace=") => {
                let limit = parse_number("--trace", Some(other["--trace=".len()..].to_owned()))?;
                options.trace = Some(Some(limit));
            }
            other if other.starts_with("--") => return Err(format!("unknown option '{other}'")),
            _ if path.is_none() => path = Some(arg),
            _ => return Err(format!("unexpected argument '{arg}'")),
        }
    }
    options.path = path.ok_or_else(|| "missing unit path".to_owned())?;
    Ok(options)
}

fn parse_number(flag: &str, value: Option<String>) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .map_err(|err| format!("invalid value '{value}' for {flag}: {err}"))
}

/// Loads a unit as JSON when the file name ends in `.json`, else as postcard bytes.
fn load_unit(path: &str) -> Result<CompiledUnit, String> {
    if path.ends_with(".json") {
        let text = fs::read_to_string(path).map_err(|err| format!("reading {path}: {err}"))?;
        CompiledUnit::from_json(&text).map_err(|err| err.to_string())
    } else {
        let bytes = fs::read(path).map_err(|err| format!("reading {path}: {err}"))?;
        CompiledUnit::from_bytes(&bytes).map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, String> {
        parse_args(args.iter().map(|s| (*s).to_owned()))
    }

    #[test]
    fn test_parse_flags() {
        let options = parse(&["unit.json", "--trace=5", "--max-depth", "50"]).unwrap();
        assert_eq!(options.path, "unit.json");
        assert_eq!(options.trace, Some(Some(5)));
        assert_eq!(options.limits.max_recursion_depth, Some(50));
        assert_eq!(options.limits.max_memory, None);
        assert!(!options.profile);
        let options = parse(&["unit.bin", "--profile"]).unwrap();
        assert_eq!(options.limits.max_recursion_depth, Some(pyrun::DEFAULT_MAX_RECURSION_DEPTH));
        assert!(options.profile);
        let options = parse(&["unit.bin", "--max-memory", "1000000"]).unwrap();
        assert_eq!(options.limits.max_memory, Some(1_000_000));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["a.json", "--max-ops"]).is_err());
        assert!(parse(&["a.json", "--bogus"]).is_err());
        assert!(parse(&["a.json", "b.json"]).is_err());
    }
}
